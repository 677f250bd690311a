//! Top CPU consumers from Query Store.
//!
//! Query Store is a per-database feature that is frequently off. When it is,
//! the collector fails with `FeatureUnavailable` and the snapshot keeps an
//! empty list plus a warning.

use common::models::TopQuery;

use super::{top_query_from_row, CollectContext, TOP_QUERY_LIMIT};
use crate::executor::{ExecError, ExecResult, SqlParam};

pub(crate) const QUERY_STORE_STATE_SQL: &str =
    "SELECT actual_state_desc FROM sys.database_query_store_options";

pub(crate) const TOP_CPU_SQL: &str = r#"
SELECT TOP (@P1)
    LEFT(qt.query_sql_text, 4000) AS query_text,
    DB_NAME() AS database_name,
    SUM(rs.count_executions) AS execution_count,
    SUM(rs.avg_cpu_time * rs.count_executions) / 1000.0 AS total_cpu_ms,
    AVG(rs.avg_cpu_time) / 1000.0 AS avg_cpu_ms,
    AVG(rs.avg_duration) / 1000.0 AS avg_duration_ms,
    CAST(SUM(rs.avg_logical_io_reads * rs.count_executions) AS bigint) AS total_logical_reads,
    CAST(SUM(rs.avg_physical_io_reads * rs.count_executions) AS bigint) AS total_physical_reads
FROM sys.query_store_query_text AS qt
JOIN sys.query_store_query AS q ON q.query_text_id = qt.query_text_id
JOIN sys.query_store_plan AS p ON p.query_id = q.query_id
JOIN sys.query_store_runtime_stats AS rs ON rs.plan_id = p.plan_id
JOIN sys.query_store_runtime_stats_interval AS rsi
    ON rsi.runtime_stats_interval_id = rs.runtime_stats_interval_id
WHERE rsi.start_time >= DATEADD(HOUR, -1, SYSUTCDATETIME())
GROUP BY qt.query_sql_text
ORDER BY total_cpu_ms DESC"#;

pub async fn collect(ctx: CollectContext<'_>) -> ExecResult<Vec<TopQuery>> {
    let state = ctx
        .executor
        .query(ctx.target, QUERY_STORE_STATE_SQL, &[], ctx.timeout)
        .await?;
    let enabled = state
        .first()
        .and_then(|r| r.text("actual_state_desc"))
        .map(|s| matches!(s.as_str(), "READ_WRITE" | "READ_ONLY"))
        .unwrap_or(false);
    if !enabled {
        return Err(ExecError::FeatureUnavailable(
            "Query Store is not enabled on the target database".into(),
        ));
    }

    let rows = ctx
        .executor
        .query(
            ctx.target,
            TOP_CPU_SQL,
            &[SqlParam::Int(TOP_QUERY_LIMIT)],
            ctx.timeout,
        )
        .await?;
    Ok(rows.iter().map(top_query_from_row).collect())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use common::models::Target;

    use super::*;
    use crate::collectors::fixtures;
    use crate::executor::testing::{row, ScriptedExecutor};

    #[tokio::test]
    async fn test_reads_top_queries_when_enabled() {
        let exec = fixtures::healthy();
        let target = Target::parse("Server=db01").unwrap();
        let queries = collect(CollectContext {
            executor: &exec,
            target: &target,
            timeout: Duration::from_secs(1),
        })
        .await
        .unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].database_name.as_deref(), Some("Sales"));
        assert_eq!(queries[0].total_cpu_ms, 5400.0);
    }

    #[tokio::test]
    async fn test_disabled_query_store_is_feature_unavailable() {
        let exec = ScriptedExecutor::new().on(
            fixtures::QUERY_STORE_STATE,
            row(vec![("actual_state_desc", json!("OFF"))]),
        );
        let target = Target::parse("Server=db01").unwrap();
        let result = collect(CollectContext {
            executor: &exec,
            target: &target,
            timeout: Duration::from_secs(1),
        })
        .await;
        assert!(matches!(result, Err(ExecError::FeatureUnavailable(_))));
        // Never reaches the runtime stats query.
        assert_eq!(exec.calls(), 1);
    }
}
