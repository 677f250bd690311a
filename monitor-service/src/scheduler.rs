//! Per-server monitoring loops.
//!
//! At most one loop runs per server key. Starting a server that already has
//! a loop cancels the old one and waits for it to exit before spawning the
//! replacement. Within a loop ticks are strictly sequential.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::models::{MonitorEvent, MonitoringSettings, Target};

use crate::pipeline::MonitorPipeline;

struct MonitorLoop {
    target: Target,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MonitorLoop {
    async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!(server = %self.target, "Monitoring loop panicked");
            }
        }
    }
}

pub struct MonitorScheduler {
    pipeline: Arc<MonitorPipeline>,
    loops: Mutex<HashMap<String, MonitorLoop>>,
}

impl MonitorScheduler {
    pub fn new(pipeline: Arc<MonitorPipeline>) -> Self {
        Self {
            pipeline,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the loop for `target`. Returns whether an
    /// existing loop was replaced.
    pub async fn start(&self, target: Target, settings: MonitoringSettings) -> bool {
        let mut loops = self.loops.lock().await;
        let replaced = match loops.remove(target.key()) {
            Some(old) => {
                old.shutdown().await;
                true
            }
            None => false,
        };

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            self.pipeline.clone(),
            target.clone(),
            settings,
            token.clone(),
        ));
        info!(server = %target, replaced, "Monitoring started");
        loops.insert(
            target.key().to_string(),
            MonitorLoop {
                target,
                token,
                handle,
            },
        );
        replaced
    }

    /// Stops the loop for `key` and drops its retained ticks. Returns
    /// `false` if none was running.
    pub async fn stop(&self, key: &str) -> bool {
        let Some(old) = self.loops.lock().await.remove(key) else {
            return false;
        };
        let server_name = old.target.display_name().to_string();
        old.shutdown().await;
        self.pipeline.history.remove(key).await;
        self.pipeline
            .hub
            .publish(key, MonitorEvent::MonitoringStopped { server_name: server_name.clone() })
            .await;
        info!(server = %server_name, "Monitoring stopped");
        true
    }

    /// Stops every loop; returns how many were running.
    pub async fn stop_all(&self) -> usize {
        let keys: Vec<String> = self.loops.lock().await.keys().cloned().collect();
        let mut stopped = 0;
        for key in keys {
            if self.stop(&key).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Restarts every running loop with new settings.
    pub async fn restart_all(&self, settings: &MonitoringSettings) -> usize {
        let targets: Vec<Target> = self
            .loops
            .lock()
            .await
            .values()
            .map(|l| l.target.clone())
            .collect();
        let count = targets.len();
        for target in targets {
            self.start(target, settings.clone()).await;
        }
        count
    }

    /// Display names of servers with a live loop.
    pub async fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .loops
            .lock()
            .await
            .values()
            .filter(|l| !l.handle.is_finished())
            .map(|l| l.target.display_name().to_string())
            .collect();
        names.sort();
        names
    }

    pub async fn is_running(&self, key: &str) -> bool {
        self.loops
            .lock()
            .await
            .get(key)
            .is_some_and(|l| !l.handle.is_finished())
    }

    #[cfg(test)]
    async fn loop_handles(&self, key: &str) -> Option<(CancellationToken, tokio::task::AbortHandle)> {
        self.loops
            .lock()
            .await
            .get(key)
            .map(|l| (l.token.clone(), l.handle.abort_handle()))
    }
}

async fn run_loop(
    pipeline: Arc<MonitorPipeline>,
    target: Target,
    settings: MonitoringSettings,
    token: CancellationToken,
) {
    let period = Duration::from_secs(settings.sampling_interval_seconds.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(server = %target, interval_secs = period.as_secs(), "Monitoring loop running");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = pipeline.tick(&target, &settings) => {}
        }
    }

    debug!(server = %target, "Monitoring loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::fixtures;
    use crate::pipeline::testing::pipeline;

    fn fast_settings() -> MonitoringSettings {
        MonitoringSettings {
            sampling_interval_seconds: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_loop() {
        let scheduler = MonitorScheduler::new(pipeline(fixtures::healthy()));
        let target = Target::parse("Server=db01").unwrap();

        assert!(!scheduler.start(target.clone(), fast_settings()).await);
        assert!(scheduler.start(target.clone(), fast_settings()).await);
        assert_eq!(scheduler.active().await, vec!["db01".to_string()]);

        // Same server under a different spelling maps to the same key.
        let alias = Target::parse("Data Source=DB01;Initial Catalog=master").unwrap();
        assert!(scheduler.start(alias, fast_settings()).await);
        assert_eq!(scheduler.active().await.len(), 1);

        assert_eq!(scheduler.stop_all().await, 1);
    }

    #[tokio::test]
    async fn test_stop_inactive_is_noop() {
        let scheduler = MonitorScheduler::new(pipeline(fixtures::healthy()));
        assert!(!scheduler.stop("db01").await);
        assert!(scheduler.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_first_tick_runs_immediately_and_stop_notifies() {
        let pipeline = pipeline(fixtures::healthy());
        let scheduler = MonitorScheduler::new(pipeline.clone());
        let target = Target::parse("Server=db01").unwrap();
        let mut rx = pipeline.hub.subscribe(target.key()).await;

        scheduler.start(target.clone(), fast_settings()).await;
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(&*first, MonitorEvent::MetricsUpdated(_)));
        assert!(scheduler.is_running(target.key()).await);

        assert!(scheduler.stop(target.key()).await);
        assert!(!scheduler.is_running(target.key()).await);
        let stopped = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(&*stopped, MonitorEvent::MonitoringStopped { .. }));
    }

    #[tokio::test]
    async fn test_restart_all_keeps_targets() {
        let scheduler = MonitorScheduler::new(pipeline(fixtures::healthy()));
        scheduler
            .start(Target::parse("Server=db01").unwrap(), fast_settings())
            .await;
        scheduler
            .start(Target::parse("Server=db02").unwrap(), fast_settings())
            .await;
        let (old_token, old_task) = scheduler.loop_handles("db01").await.unwrap();

        assert_eq!(scheduler.restart_all(&fast_settings()).await, 2);
        assert_eq!(
            scheduler.active().await,
            vec!["db01".to_string(), "db02".to_string()]
        );

        // The replaced loop was cancelled and has exited; its successor runs.
        assert!(old_token.is_cancelled());
        assert!(old_task.is_finished());
        let (new_token, new_task) = scheduler.loop_handles("db01").await.unwrap();
        assert!(!new_token.is_cancelled());
        assert!(!new_task.is_finished());
        assert_eq!(scheduler.loops.lock().await.len(), 2);

        scheduler.stop_all().await;
        assert!(new_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_drops_retained_ticks() {
        let pipeline = pipeline(fixtures::healthy());
        let scheduler = MonitorScheduler::new(pipeline.clone());
        let target = Target::parse("Server=db01").unwrap();
        let mut rx = pipeline.hub.subscribe(target.key()).await;

        scheduler.start(target.clone(), fast_settings()).await;
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(pipeline.history.latest(target.key()).await.is_some());

        scheduler.stop(target.key()).await;
        assert!(pipeline.history.latest(target.key()).await.is_none());
        assert!(pipeline.history.list(target.key()).await.is_empty());
    }
}
