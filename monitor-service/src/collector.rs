//! Snapshot assembly.
//!
//! `MetricsCollector` probes the target, then runs the enabled fact
//! collectors concurrently and merges their results into one
//! `MetricSnapshot`. A failed collector degrades its own fact; only a
//! connectivity failure degrades the whole snapshot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use common::models::{ConnectivityCheck, MetricSnapshot, MonitoringSettings, Target};

use crate::collectors::{connectivity, cpu, disk, memory, top_queries, waits, CollectContext};
use crate::executor::{ExecError, ExecResult, SqlExecutor};

pub struct MetricsCollector {
    executor: Arc<dyn SqlExecutor>,
    query_timeout: Duration,
}

impl MetricsCollector {
    pub fn new(executor: Arc<dyn SqlExecutor>, query_timeout: Duration) -> Self {
        Self {
            executor,
            query_timeout,
        }
    }

    fn context<'a>(&'a self, target: &'a Target) -> CollectContext<'a> {
        CollectContext {
            executor: self.executor.as_ref(),
            target,
            timeout: self.query_timeout,
        }
    }

    /// Runs only the probe.
    pub async fn check_connectivity(&self, target: &Target) -> ConnectivityCheck {
        let timestamp = Utc::now();
        match connectivity::probe(self.context(target)).await {
            Ok(_) => ConnectivityCheck {
                is_connected: true,
                server_name: target.display_name().to_string(),
                timestamp,
                error: None,
            },
            Err(e) => {
                info!(server = %target, error = %e, "Connectivity check failed");
                ConnectivityCheck {
                    is_connected: false,
                    server_name: target.display_name().to_string(),
                    timestamp,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Collects one snapshot. Never fails: every failure is recorded inside
    /// the snapshot.
    pub async fn collect(&self, target: &Target, settings: &MonitoringSettings) -> MetricSnapshot {
        let collected_at = Utc::now();
        let server = target.display_name();
        let ctx = self.context(target);

        let probe = match connectivity::probe(ctx).await {
            Ok(fact) => fact,
            Err(e) => {
                warn!(server = %target, error = %e, "Target unreachable");
                return MetricSnapshot::disconnected(server, collected_at, e.to_string());
            }
        };

        let (cpu, top, memory, disk, waits) = tokio::join!(
            enabled(settings.collect_cpu, cpu::collect(ctx)),
            enabled(
                settings.collect_cpu && settings.collect_query_store,
                top_queries::collect(ctx)
            ),
            enabled(settings.collect_memory, memory::collect(ctx)),
            enabled(settings.collect_disk_io, disk::collect(ctx)),
            enabled(settings.collect_wait_stats, waits::collect(ctx)),
        );

        let lost = [
            connectivity_error(&cpu),
            connectivity_error(&top),
            connectivity_error(&memory),
            connectivity_error(&disk),
            connectivity_error(&waits),
        ]
        .into_iter()
        .flatten()
        .next();
        if let Some(error) = lost {
            warn!(server = %target, error = %error, "Connection lost during collection");
            return MetricSnapshot::disconnected(server, collected_at, error);
        }

        let mut snapshot = MetricSnapshot::new(server, collected_at);
        snapshot.connectivity = probe;

        snapshot.cpu = settle(target, "cpu", cpu, |fact, e| fact.error = Some(e));
        match top {
            Ok(queries) => snapshot.cpu.top_cpu_queries = queries,
            Err(e) => {
                log_failure(target, "top_queries", &e);
                snapshot.cpu.top_queries_warning = Some(e.to_string());
            }
        }
        snapshot.memory = settle(target, "memory", memory, |fact, e| fact.error = Some(e));
        snapshot.disk = settle(target, "disk", disk, |fact, e| fact.error = Some(e));
        snapshot.cpu.skipped = !settings.collect_cpu;
        snapshot.memory.skipped = !settings.collect_memory;
        snapshot.disk.skipped = !settings.collect_disk_io;
        match waits {
            Ok(list) => snapshot.wait_statistics = list,
            Err(e) => {
                log_failure(target, "waits", &e);
                snapshot.wait_statistics_error = Some(e.to_string());
            }
        }

        debug!(server = %target, "Snapshot collected");
        snapshot
    }
}

/// Skips a disabled collector, yielding its empty fact. The caller marks
/// the fact as skipped.
async fn enabled<T, F>(on: bool, fut: F) -> ExecResult<T>
where
    T: Default,
    F: Future<Output = ExecResult<T>>,
{
    if on {
        fut.await
    } else {
        Ok(T::default())
    }
}

fn connectivity_error<T>(result: &ExecResult<T>) -> Option<String> {
    match result {
        Err(e @ ExecError::Connectivity(_)) => Some(e.to_string()),
        _ => None,
    }
}

/// Unwraps a collector result, turning a failure into a zero fact that
/// carries the error.
fn settle<T: Default>(
    target: &Target,
    collector: &'static str,
    result: ExecResult<T>,
    mark: impl FnOnce(&mut T, String),
) -> T {
    match result {
        Ok(fact) => fact,
        Err(e) => {
            log_failure(target, collector, &e);
            let mut fact = T::default();
            mark(&mut fact, e.to_string());
            fact
        }
    }
}

fn log_failure(target: &Target, collector: &'static str, error: &ExecError) {
    match error {
        ExecError::FeatureUnavailable(_) => {
            debug!(server = %target, collector, error = %error, "Collector skipped")
        }
        _ => warn!(server = %target, collector, error = %error, "Collector failed"),
    }
}
