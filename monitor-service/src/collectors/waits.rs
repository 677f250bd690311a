//! Wait statistics collector.
//!
//! Raw `sys.dm_os_wait_stats` rows are filtered against a denylist of idle
//! and background waits, ranked by share of the remaining wait time, cut to
//! the top ten and classified by wait type name.

use std::cmp::Ordering;

use common::models::{WaitCategory, WaitStatistic};

use super::CollectContext;
use crate::executor::ExecResult;

/// Benign or idle wait types that never indicate a bottleneck.
pub const BENIGN_WAITS: &[&str] = &[
    "CLR_SEMAPHORE",
    "LAZYWRITER_SLEEP",
    "RESOURCE_QUEUE",
    "SLEEP_TASK",
    "SLEEP_SYSTEMTASK",
    "SQLTRACE_BUFFER_FLUSH",
    "WAITFOR",
    "LOGMGR_QUEUE",
    "CHECKPOINT_QUEUE",
    "REQUEST_FOR_DEADLOCK_SEARCH",
    "XE_TIMER_EVENT",
    "BROKER_TO_FLUSH",
    "BROKER_TASK_STOP",
    "CLR_MANUAL_EVENT",
    "CLR_AUTO_EVENT",
    "DISPATCHER_QUEUE_SEMAPHORE",
    "FT_IFTS_SCHEDULER_IDLE_WAIT",
    "XE_DISPATCHER_WAIT",
    "XE_DISPATCHER_JOIN",
    "BROKER_EVENTHANDLER",
    "TRACEWRITE",
    "FT_IFTSHC_MUTEX",
    "SQLTRACE_INCREMENTAL_FLUSH_SLEEP",
];

/// Number of wait types reported.
pub const TOP_WAITS: usize = 10;

pub(crate) const WAIT_STATS_SQL: &str = r#"
SELECT wait_type, wait_time_ms, waiting_tasks_count
FROM sys.dm_os_wait_stats
WHERE wait_time_ms > 0"#;

// Checked in order; the first category with a matching fragment wins.
const CATEGORY_PATTERNS: &[(WaitCategory, &[&str])] = &[
    (
        WaitCategory::Cpu,
        &["SOS_SCHEDULER_YIELD", "CXPACKET", "CXCONSUMER", "CXSYNC", "THREADPOOL"],
    ),
    (
        WaitCategory::Memory,
        &["RESOURCE_SEMAPHORE", "CMEMTHREAD", "MEMORY", "PAGELATCH"],
    ),
    (
        WaitCategory::Disk,
        &["PAGEIOLATCH", "WRITELOG", "IO_COMPLETION", "ASYNC_IO", "LOGBUFFER", "WRITE_COMPLETION"],
    ),
    (
        WaitCategory::Network,
        &["ASYNC_NETWORK_IO", "NETWORK", "HADR_SYNC_COMMIT"],
    ),
    (WaitCategory::Locking, &["LCK_M_", "LOCK"]),
];

/// Raw wait counter as read from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWait {
    pub wait_type: String,
    pub wait_time_ms: i64,
    pub waiting_tasks_count: i64,
}

pub async fn collect(ctx: CollectContext<'_>) -> ExecResult<Vec<WaitStatistic>> {
    let rows = ctx
        .executor
        .query(ctx.target, WAIT_STATS_SQL, &[], ctx.timeout)
        .await?;
    let raw = rows
        .iter()
        .map(|row| RawWait {
            wait_type: row.text("wait_type").unwrap_or_default(),
            wait_time_ms: row.i64("wait_time_ms"),
            waiting_tasks_count: row.i64("waiting_tasks_count"),
        })
        .collect();
    Ok(rank(raw))
}

/// Drops benign waits, computes each type's share of the remaining total
/// and returns the top entries, largest share first.
pub fn rank(raw: Vec<RawWait>) -> Vec<WaitStatistic> {
    let mut kept: Vec<RawWait> = raw
        .into_iter()
        .filter(|w| w.wait_time_ms > 0 && !is_benign(&w.wait_type))
        .collect();
    let total: i64 = kept.iter().map(|w| w.wait_time_ms).sum();
    if total == 0 {
        return Vec::new();
    }

    kept.sort_by(|a, b| match b.wait_time_ms.cmp(&a.wait_time_ms) {
        Ordering::Equal => a.wait_type.cmp(&b.wait_type),
        other => other,
    });

    kept.into_iter()
        .take(TOP_WAITS)
        .map(|w| {
            let category = categorize(&w.wait_type);
            WaitStatistic {
                description: describe(&w.wait_type, category).to_string(),
                percentage: w.wait_time_ms as f64 * 100.0 / total as f64,
                wait_type: w.wait_type,
                wait_time_ms: w.wait_time_ms,
                waiting_tasks_count: w.waiting_tasks_count,
                category,
            }
        })
        .collect()
}

pub fn is_benign(wait_type: &str) -> bool {
    BENIGN_WAITS.iter().any(|b| b.eq_ignore_ascii_case(wait_type))
}

/// Classifies a wait type by substring match on its name.
pub fn categorize(wait_type: &str) -> WaitCategory {
    let upper = wait_type.to_ascii_uppercase();
    CATEGORY_PATTERNS
        .iter()
        .find(|(_, fragments)| fragments.iter().any(|f| upper.contains(f)))
        .map(|(category, _)| *category)
        .unwrap_or(WaitCategory::Other)
}

fn describe(wait_type: &str, category: WaitCategory) -> &'static str {
    match wait_type.to_ascii_uppercase().as_str() {
        "SOS_SCHEDULER_YIELD" => "Threads yielding the scheduler; sustained CPU pressure",
        "CXPACKET" | "CXCONSUMER" => "Parallel query exchange; check MAXDOP and cost threshold",
        "THREADPOOL" => "No worker thread available; possible worker starvation",
        "RESOURCE_SEMAPHORE" => "Queries waiting for a memory grant",
        "PAGEIOLATCH_SH" | "PAGEIOLATCH_EX" => "Reading data pages from disk into the buffer pool",
        "WRITELOG" => "Waiting for transaction log flushes to disk",
        "ASYNC_NETWORK_IO" => "Client is not consuming results fast enough",
        _ => match category {
            WaitCategory::Cpu => "CPU scheduling or parallelism wait",
            WaitCategory::Memory => "Memory allocation or in-memory latch wait",
            WaitCategory::Disk => "Storage I/O wait",
            WaitCategory::Network => "Network or remote replica wait",
            WaitCategory::Locking => "Lock acquisition wait; sessions are being blocked",
            WaitCategory::Other => "Other wait",
        },
    }
}
