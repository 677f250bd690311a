//! Alert delivery.
//!
//! Alerts are derived from a tick (threshold breaches against the user's
//! alert thresholds, plus newly recorded Critical issues) and fanned out to
//! the configured channels. An alert repeating within the cooldown is not
//! sent again. Delivery failures are logged and never reach the monitoring
//! loop.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::models::{AlertChannel, AlertChannelKind, Issue, IssueSeverity, MetricSnapshot, MonitoringSettings};

/// Payload posted to webhooks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub server_name: String,
    pub severity: IssueSeverity,
    pub title: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Builds the alerts for one tick.
pub fn build_alerts(
    settings: &MonitoringSettings,
    snapshot: &MetricSnapshot,
    new_issues: &[Issue],
) -> Vec<Alert> {
    let server = &snapshot.server_name;
    let at = snapshot.collected_at;
    let mut alerts = Vec::new();

    if snapshot.is_connected() {
        let cpu = &snapshot.cpu;
        if cpu.is_available() && cpu.utilization_percent > settings.cpu_threshold {
            alerts.push(Alert {
                server_name: server.clone(),
                severity: IssueSeverity::High,
                title: "High CPU".into(),
                message: format!(
                    "CPU utilization {:.1}% exceeds the {:.1}% alert threshold",
                    cpu.utilization_percent, settings.cpu_threshold
                ),
                raised_at: at,
            });
        }
        let memory = &snapshot.memory;
        if memory.is_available()
            && memory.page_life_expectancy_seconds < settings.page_life_expectancy_threshold
        {
            alerts.push(Alert {
                server_name: server.clone(),
                severity: IssueSeverity::High,
                title: "Low page life expectancy".into(),
                message: format!(
                    "Page life expectancy {}s is below the {}s alert threshold",
                    memory.page_life_expectancy_seconds, settings.page_life_expectancy_threshold
                ),
                raised_at: at,
            });
        }
    }

    alerts.extend(
        new_issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Critical)
            .map(|i| Alert {
                server_name: i.server_name.clone(),
                severity: i.severity,
                title: format!("{} detected", i.issue_type.as_str()),
                message: i.message.clone(),
                raised_at: i.detected_at,
            }),
    );

    alerts
}

/// Minimum gap between two sends of the same alert for the same server.
pub const ALERT_COOLDOWN_MINUTES: i64 = 15;

pub struct AlertDispatcher {
    client: reqwest::Client,
    cooldown: chrono::Duration,
    /// Last send time per (server, title).
    last_sent: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl AlertDispatcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client for alerts");
                reqwest::Client::new()
            });
        Self {
            client,
            cooldown: chrono::Duration::minutes(ALERT_COOLDOWN_MINUTES),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Sends every alert outside its cooldown to every enabled channel whose
    /// minimum severity it meets. Returns how many alerts went out.
    pub async fn dispatch(&self, channels: &[AlertChannel], alerts: &[Alert]) -> usize {
        let due = self.take_due(alerts).await;
        let deliveries = channels
            .iter()
            .filter(|c| c.enabled)
            .flat_map(|c| {
                due.iter()
                    .filter(move |a| a.severity >= c.min_severity)
                    .map(move |a| self.deliver(c, a))
            });
        join_all(deliveries).await;
        due.len()
    }

    /// Drops alerts sent within the cooldown and stamps the rest.
    async fn take_due<'a>(&self, alerts: &'a [Alert]) -> Vec<&'a Alert> {
        let mut last_sent = self.last_sent.lock().await;
        alerts
            .iter()
            .filter(|alert| {
                let key = (alert.server_name.clone(), alert.title.clone());
                let cooling = last_sent
                    .get(&key)
                    .is_some_and(|at| alert.raised_at - *at < self.cooldown);
                if cooling {
                    debug!(server = %alert.server_name, title = %alert.title, "Alert in cooldown");
                } else {
                    last_sent.insert(key, alert.raised_at);
                }
                !cooling
            })
            .collect()
    }

    async fn deliver(&self, channel: &AlertChannel, alert: &Alert) {
        match (channel.kind, channel.url.as_deref()) {
            (AlertChannelKind::Webhook, Some(url)) => {
                match self.client.post(url).json(alert).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        info!(channel = %channel.name, server = %alert.server_name, title = %alert.title, "Alert delivered");
                    }
                    Ok(resp) => {
                        warn!(channel = %channel.name, status = %resp.status(), "Alert webhook rejected the request");
                    }
                    Err(e) => {
                        warn!(channel = %channel.name, error = %e, "Alert webhook failed");
                    }
                }
            }
            (AlertChannelKind::Webhook, None) => {
                warn!(channel = %channel.name, "Webhook channel has no url");
            }
            (AlertChannelKind::Log, _) => {
                warn!(
                    channel = %channel.name,
                    server = %alert.server_name,
                    severity = %alert.severity,
                    title = %alert.title,
                    "{}",
                    alert.message
                );
            }
        }
    }
}
