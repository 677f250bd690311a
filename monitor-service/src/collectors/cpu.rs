//! CPU utilization collector.
//!
//! Utilization comes from the most recent scheduler monitor record in the
//! ring buffer, which SQL Server writes roughly once a minute. Worker and
//! request counts are read live.

use common::models::CpuFact;

use super::CollectContext;
use crate::executor::ExecResult;

pub(crate) const CPU_UTILIZATION_SQL: &str = r#"
SELECT TOP (1)
    record.value('(./Record/SchedulerMonitorEvent/SystemHealth/ProcessUtilization)[1]', 'int') AS sql_cpu_percent
FROM (
    SELECT CONVERT(xml, record) AS record, [timestamp]
    FROM sys.dm_os_ring_buffers
    WHERE ring_buffer_type = N'RING_BUFFER_SCHEDULER_MONITOR'
      AND record LIKE N'%<SystemHealth>%'
) AS rb
ORDER BY [timestamp] DESC"#;

pub(crate) const CPU_WORKLOAD_SQL: &str = r#"
SELECT
    (SELECT SUM(active_workers_count) FROM sys.dm_os_schedulers WHERE [status] = N'VISIBLE ONLINE') AS active_worker_threads,
    (SELECT COUNT(*) FROM sys.dm_exec_requests WHERE session_id > 50 AND session_id <> @@SPID) AS active_requests"#;

/// Collects the CPU fact without top queries; those come from the Query
/// Store collector and are merged in by the caller.
pub async fn collect(ctx: CollectContext<'_>) -> ExecResult<CpuFact> {
    let (utilization, workload) = tokio::try_join!(
        ctx.executor
            .query(ctx.target, CPU_UTILIZATION_SQL, &[], ctx.timeout),
        ctx.executor
            .query(ctx.target, CPU_WORKLOAD_SQL, &[], ctx.timeout),
    )?;

    let percent = utilization
        .first()
        .map(|r| r.f64("sql_cpu_percent"))
        .unwrap_or(0.0)
        .clamp(0.0, 100.0);
    let workload = workload.first();

    Ok(CpuFact {
        utilization_percent: percent,
        active_worker_threads: workload.map(|r| r.i64("active_worker_threads")).unwrap_or(0),
        active_requests: workload.map(|r| r.i64("active_requests")).unwrap_or(0),
        ..Default::default()
    })
}
