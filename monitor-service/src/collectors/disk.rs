//! Disk I/O collector.
//!
//! Latencies are cumulative averages since the last restart
//! (`io_stall / operations`), which is what the DMV exposes.

use common::models::{DiskFact, FileIoStat};

use super::{supplementary, top_query_from_row, CollectContext, TOP_QUERY_LIMIT};
use crate::executor::{ExecResult, SqlParam};

pub(crate) const FILE_IO_SQL: &str = r#"
SELECT f.*
FROM (
SELECT
    DB_NAME(vfs.database_id) AS database_name,
    mf.name AS file_name,
    mf.type_desc AS file_type,
    CASE WHEN vfs.num_of_reads = 0 THEN 0
         ELSE CAST(vfs.io_stall_read_ms AS float) / vfs.num_of_reads END AS read_latency_ms,
    CASE WHEN vfs.num_of_writes = 0 THEN 0
         ELSE CAST(vfs.io_stall_write_ms AS float) / vfs.num_of_writes END AS write_latency_ms,
    CASE WHEN vfs.sample_ms <= 0 THEN 0
         ELSE CAST(vfs.num_of_bytes_read AS float) * 1000 / vfs.sample_ms END AS read_bytes_per_sec,
    CASE WHEN vfs.sample_ms <= 0 THEN 0
         ELSE CAST(vfs.num_of_bytes_written AS float) * 1000 / vfs.sample_ms END AS write_bytes_per_sec
FROM sys.dm_io_virtual_file_stats(NULL, NULL) AS vfs
JOIN sys.master_files AS mf ON mf.database_id = vfs.database_id AND mf.file_id = vfs.file_id
) AS f
ORDER BY f.read_latency_ms + f.write_latency_ms DESC"#;

pub(crate) const TOP_IO_SQL: &str = r#"
SELECT TOP (@P1)
    LEFT(st.[text], 4000) AS query_text,
    DB_NAME(st.dbid) AS database_name,
    qs.execution_count,
    qs.total_worker_time / 1000.0 AS total_cpu_ms,
    qs.total_worker_time / 1000.0 / NULLIF(qs.execution_count, 0) AS avg_cpu_ms,
    qs.total_elapsed_time / 1000.0 / NULLIF(qs.execution_count, 0) AS avg_duration_ms,
    qs.total_logical_reads,
    qs.total_physical_reads
FROM sys.dm_exec_query_stats AS qs
CROSS APPLY sys.dm_exec_sql_text(qs.sql_handle) AS st
ORDER BY qs.total_logical_reads + qs.total_physical_reads DESC"#;

pub async fn collect(ctx: CollectContext<'_>) -> ExecResult<DiskFact> {
    let (files, top_io) = tokio::join!(
        ctx.executor.query(ctx.target, FILE_IO_SQL, &[], ctx.timeout),
        ctx.executor.query(
            ctx.target,
            TOP_IO_SQL,
            &[SqlParam::Int(TOP_QUERY_LIMIT)],
            ctx.timeout
        ),
    );
    let files = files?;
    let top_io = supplementary(ctx, "top_io", top_io)?;

    let files = files
        .iter()
        .map(|row| FileIoStat {
            database_name: row.text("database_name").unwrap_or_default(),
            file_name: row.text("file_name").unwrap_or_default(),
            file_type: row.text("file_type").unwrap_or_default(),
            read_latency_ms: row.f64("read_latency_ms"),
            write_latency_ms: row.f64("write_latency_ms"),
            read_bytes_per_sec: row.f64("read_bytes_per_sec"),
            write_bytes_per_sec: row.f64("write_bytes_per_sec"),
        })
        .collect();

    Ok(DiskFact {
        files,
        top_io_queries: top_io.iter().map(top_query_from_row).collect(),
        ..Default::default()
    })
}
