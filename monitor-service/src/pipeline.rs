//! One monitoring tick: collect, detect, record, evaluate, keep, alert, publish.

use std::sync::Arc;

use tracing::{debug, warn};

use common::models::{
    HealthThresholds, Issue, MonitorEvent, MonitorTick, MonitoringSettings, Target,
};

use crate::alerts::{build_alerts, AlertDispatcher};
use crate::collector::MetricsCollector;
use crate::detector::detect;
use crate::evaluator::evaluate;
use crate::history::SnapshotHistory;
use crate::hub::MetricsHub;
use crate::repository::{IssueRepository, Recorded};

pub struct MonitorPipeline {
    pub collector: Arc<MetricsCollector>,
    pub issues: Arc<dyn IssueRepository>,
    pub history: Arc<SnapshotHistory>,
    pub hub: Arc<MetricsHub>,
    pub alerts: Arc<AlertDispatcher>,
    pub thresholds: HealthThresholds,
}

impl MonitorPipeline {
    /// Runs one tick for `target` and publishes the result to its group.
    pub async fn tick(&self, target: &Target, settings: &MonitoringSettings) -> Arc<MonitorTick> {
        let tick = Arc::new(self.evaluate_once(target, settings).await);

        self.history
            .push(target.key(), tick.clone(), settings.history_capacity())
            .await;
        let delivered = self
            .hub
            .publish(target.key(), MonitorEvent::MetricsUpdated((*tick).clone()))
            .await;
        debug!(
            server = %target,
            overall = %tick.health.overall,
            issues = tick.issues.len(),
            subscribers = delivered,
            "Tick published"
        );
        tick
    }

    /// Collects and evaluates without touching history or subscribers.
    /// New issues are still recorded and alerted on. The tick carries the
    /// stored issues, so their ids resolve against the issue store.
    pub async fn evaluate_once(&self, target: &Target, settings: &MonitoringSettings) -> MonitorTick {
        let snapshot = self.collector.collect(target, settings).await;
        let detected = detect(&snapshot, &self.thresholds);
        let health = evaluate(&snapshot, &detected, &self.thresholds);

        let (issues, new_issues) = match self.issues.record(detected.clone()).await {
            Ok(recorded) => split_recorded(recorded),
            Err(e) => {
                warn!(server = %target, error = %e, "Failed to record issues");
                (detected, Vec::new())
            }
        };

        let alerts = build_alerts(settings, &snapshot, &new_issues);
        if !alerts.is_empty() && !settings.alert_channels.is_empty() {
            let sent = self.alerts.dispatch(&settings.alert_channels, &alerts).await;
            debug!(server = %target, raised = alerts.len(), sent, "Alerts dispatched");
        }

        MonitorTick {
            server_name: target.display_name().to_string(),
            snapshot,
            health,
            issues,
        }
    }
}

/// Splits recorded issues into all stored issues and the newly created ones.
pub(crate) fn split_recorded(recorded: Vec<Recorded>) -> (Vec<Issue>, Vec<Issue>) {
    let new_issues = recorded
        .iter()
        .filter(|r| r.is_new)
        .map(|r| r.issue.clone())
        .collect();
    let stored = recorded.into_iter().map(|r| r.issue).collect();
    (stored, new_issues)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;
    use crate::executor::testing::ScriptedExecutor;
    use crate::repository::InMemoryIssueRepository;

    pub fn pipeline(exec: ScriptedExecutor) -> Arc<MonitorPipeline> {
        Arc::new(MonitorPipeline {
            collector: Arc::new(MetricsCollector::new(
                Arc::new(exec),
                Duration::from_millis(500),
            )),
            issues: Arc::new(InMemoryIssueRepository::new()),
            history: Arc::new(SnapshotHistory::new()),
            hub: Arc::new(MetricsHub::new(16)),
            alerts: Arc::new(AlertDispatcher::new(Duration::from_millis(100))),
            thresholds: HealthThresholds::default(),
        })
    }
}
