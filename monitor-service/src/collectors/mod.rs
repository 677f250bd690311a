//! Metric collectors.
//!
//! Each collector runs one small set of read-only DMV queries against a
//! target and maps the rows onto a typed fact. Collectors know nothing about
//! each other; `MetricsCollector` runs them concurrently and merges.

pub mod connectivity;
pub mod cpu;
pub mod disk;
pub mod memory;
pub mod top_queries;
pub mod waits;

use std::time::Duration;

use tracing::warn;

use common::models::{Target, TopQuery};

use crate::executor::{ExecError, ExecResult, SqlExecutor, SqlRow};

/// Rows returned by the top-query collectors.
pub const TOP_QUERY_LIMIT: i64 = 10;

/// What every collector needs to run its queries.
#[derive(Clone, Copy)]
pub struct CollectContext<'a> {
    pub executor: &'a dyn SqlExecutor,
    pub target: &'a Target,
    pub timeout: Duration,
}

/// Maps a row with the shared top-query column set.
pub(crate) fn top_query_from_row(row: &SqlRow) -> TopQuery {
    TopQuery {
        query_text: row.text("query_text").unwrap_or_default(),
        database_name: row.text("database_name"),
        execution_count: row.i64("execution_count"),
        total_cpu_ms: row.f64("total_cpu_ms"),
        avg_cpu_ms: row.f64("avg_cpu_ms"),
        avg_duration_ms: row.f64("avg_duration_ms"),
        total_logical_reads: row.i64("total_logical_reads"),
        total_physical_reads: row.i64("total_physical_reads"),
    }
}

/// Rows of a query that only enriches a fact. Any failure other than a lost
/// connection is logged and yields no rows, so the main query still counts.
pub(crate) fn supplementary(
    ctx: CollectContext<'_>,
    query: &'static str,
    result: ExecResult<Vec<SqlRow>>,
) -> ExecResult<Vec<SqlRow>> {
    match result {
        Ok(rows) => Ok(rows),
        Err(e @ ExecError::Connectivity(_)) => Err(e),
        Err(e) => {
            warn!(server = %ctx.target, query, error = %e, "Supplementary query failed");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Canned DMV results for a healthy server.

    use serde_json::json;

    use crate::executor::testing::{row, ScriptedExecutor};
    use crate::executor::SqlRow;

    pub const PROBE: &str = "SERVERPROPERTY('ProductVersion')";
    pub const CPU_RING_BUFFER: &str = "RING_BUFFER_SCHEDULER_MONITOR";
    pub const CPU_WORKLOAD: &str = "dm_os_schedulers";
    pub const QUERY_STORE_STATE: &str = "database_query_store_options";
    pub const QUERY_STORE_TOP: &str = "query_store_runtime_stats";
    pub const MEMORY_COUNTERS: &str = "Target Server Memory";
    pub const MEMORY_CLERKS: &str = "dm_os_memory_clerks";
    pub const FILE_IO: &str = "dm_io_virtual_file_stats";
    pub const TOP_IO: &str = "dm_exec_query_stats";
    pub const WAIT_STATS: &str = "dm_os_wait_stats";

    pub fn probe_row() -> Vec<SqlRow> {
        row(vec![
            ("server_name", json!("DB01")),
            ("product_version", json!("16.0.4135.4")),
        ])
    }

    pub fn cpu_row(percent: i64) -> Vec<SqlRow> {
        row(vec![("sql_cpu_percent", json!(percent))])
    }

    pub fn memory_row(ple: i64) -> Vec<SqlRow> {
        row(vec![
            ("total_server_memory_mb", json!(8192.0)),
            ("target_server_memory_mb", json!(12288.0)),
            ("page_life_expectancy", json!(ple)),
        ])
    }

    pub fn file_row(db: &str, read_ms: f64, write_ms: f64) -> SqlRow {
        SqlRow::from_pairs([
            ("database_name", json!(db)),
            ("file_name", json!(format!("{}_data", db))),
            ("file_type", json!("ROWS")),
            ("read_latency_ms", json!(read_ms)),
            ("write_latency_ms", json!(write_ms)),
            ("read_bytes_per_sec", json!(1024.0)),
            ("write_bytes_per_sec", json!(512.0)),
        ])
    }

    pub fn wait_row(wait_type: &str, wait_ms: i64) -> SqlRow {
        SqlRow::from_pairs([
            ("wait_type", json!(wait_type)),
            ("wait_time_ms", json!(wait_ms)),
            ("waiting_tasks_count", json!(3)),
        ])
    }

    /// A reachable server with the given CPU, PLE and worst file latency.
    pub fn server(cpu: i64, ple: i64, latency_ms: f64) -> ScriptedExecutor {
        ScriptedExecutor::new()
            .on(PROBE, probe_row())
            .on(CPU_RING_BUFFER, cpu_row(cpu))
            .on(
                CPU_WORKLOAD,
                row(vec![
                    ("active_worker_threads", json!(24)),
                    ("active_requests", json!(5)),
                ]),
            )
            .on(QUERY_STORE_STATE, row(vec![("actual_state_desc", json!("READ_WRITE"))]))
            .on(
                QUERY_STORE_TOP,
                row(vec![
                    ("query_text", json!("SELECT * FROM dbo.Orders")),
                    ("database_name", json!("Sales")),
                    ("execution_count", json!(120)),
                    ("total_cpu_ms", json!(5400.0)),
                    ("avg_cpu_ms", json!(45.0)),
                    ("avg_duration_ms", json!(80.0)),
                    ("total_logical_reads", json!(9000)),
                    ("total_physical_reads", json!(12)),
                ]),
            )
            .on(MEMORY_COUNTERS, memory_row(ple))
            .on(
                MEMORY_CLERKS,
                row(vec![
                    ("plan_cache_mb", json!(512.0)),
                    ("buffer_pool_mb", json!(6144.0)),
                    ("low_memory_signal", json!(0)),
                ]),
            )
            .on(FILE_IO, vec![file_row("Sales", latency_ms, 2.0), file_row("tempdb", 1.0, 1.5)])
            .on(
                WAIT_STATS,
                vec![
                    wait_row("CXPACKET", 4000),
                    wait_row("PAGEIOLATCH_SH", 3000),
                    wait_row("SLEEP_TASK", 900_000),
                    wait_row("LCK_M_X", 3000),
                ],
            )
    }

    /// Healthy server: CPU 10%, PLE 3600s, 5ms latency.
    pub fn healthy() -> ScriptedExecutor {
        server(10, 3600, 5.0)
    }
}
