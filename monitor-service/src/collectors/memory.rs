//! Memory collector.

use common::models::MemoryFact;

use super::{supplementary, CollectContext};
use crate::executor::ExecResult;

pub(crate) const MEMORY_COUNTERS_SQL: &str = r#"
SELECT
    MAX(CASE WHEN counter_name = N'Total Server Memory (KB)' THEN cntr_value END) / 1024.0 AS total_server_memory_mb,
    MAX(CASE WHEN counter_name = N'Target Server Memory (KB)' THEN cntr_value END) / 1024.0 AS target_server_memory_mb,
    MAX(CASE WHEN counter_name = N'Page life expectancy' AND [object_name] LIKE N'%Buffer Manager%'
             THEN cntr_value END) AS page_life_expectancy
FROM sys.dm_os_performance_counters
WHERE counter_name IN (N'Total Server Memory (KB)', N'Target Server Memory (KB)', N'Page life expectancy')"#;

pub(crate) const MEMORY_CLERKS_SQL: &str = r#"
SELECT
    SUM(CASE WHEN [type] IN (N'CACHESTORE_SQLCP', N'CACHESTORE_OBJCP', N'CACHESTORE_PHDR')
             THEN pages_kb ELSE 0 END) / 1024.0 AS plan_cache_mb,
    SUM(CASE WHEN [type] = N'MEMORYCLERK_SQLBUFFERPOOL' THEN pages_kb ELSE 0 END) / 1024.0 AS buffer_pool_mb,
    (SELECT MAX(CAST(system_low_memory_signal_state AS int)) FROM sys.dm_os_sys_memory) AS low_memory_signal
FROM sys.dm_os_memory_clerks"#;

pub async fn collect(ctx: CollectContext<'_>) -> ExecResult<MemoryFact> {
    let (counters, clerks) = tokio::join!(
        ctx.executor
            .query(ctx.target, MEMORY_COUNTERS_SQL, &[], ctx.timeout),
        ctx.executor
            .query(ctx.target, MEMORY_CLERKS_SQL, &[], ctx.timeout),
    );
    let counters = counters?;
    let clerks = supplementary(ctx, "memory_clerks", clerks)?;

    let mut fact = MemoryFact::default();
    if let Some(row) = counters.first() {
        fact.total_server_memory_mb = row.f64("total_server_memory_mb");
        fact.target_server_memory_mb = row.f64("target_server_memory_mb");
        fact.page_life_expectancy_seconds = row.i64("page_life_expectancy");
    }
    let mut low_memory_signal = false;
    if let Some(row) = clerks.first() {
        fact.plan_cache_mb = row.f64("plan_cache_mb");
        fact.buffer_pool_mb = row.f64("buffer_pool_mb");
        low_memory_signal = row.flag("low_memory_signal");
    }
    fact.memory_pressure = low_memory_signal
        || (fact.target_server_memory_mb > 0.0
            && fact.total_server_memory_mb > fact.target_server_memory_mb);
    Ok(fact)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use common::models::Target;

    use super::*;
    use crate::collectors::fixtures;
    use crate::executor::testing::{row, ScriptedExecutor};
    use crate::executor::ExecError;

    fn ctx<'a>(exec: &'a ScriptedExecutor, target: &'a Target) -> CollectContext<'a> {
        CollectContext {
            executor: exec,
            target,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_reads_counters_and_clerks() {
        let exec = fixtures::server(10, 450, 5.0);
        let target = Target::parse("Server=db01").unwrap();
        let fact = collect(ctx(&exec, &target)).await.unwrap();
        assert_eq!(fact.page_life_expectancy_seconds, 450);
        assert_eq!(fact.total_server_memory_mb, 8192.0);
        assert_eq!(fact.buffer_pool_mb, 6144.0);
        assert!(!fact.memory_pressure);
    }

    #[tokio::test]
    async fn test_clerk_failure_keeps_counters() {
        let exec = ScriptedExecutor::new()
            .fail(fixtures::MEMORY_CLERKS, ExecError::Transient("lock timeout".into()))
            .on(fixtures::MEMORY_COUNTERS, fixtures::memory_row(900));
        let target = Target::parse("Server=db01").unwrap();
        let fact = collect(ctx(&exec, &target)).await.unwrap();
        assert_eq!(fact.page_life_expectancy_seconds, 900);
        assert_eq!(fact.buffer_pool_mb, 0.0);
        assert!(fact.error.is_none());
    }

    #[tokio::test]
    async fn test_counter_failure_fails_the_fact() {
        let exec = ScriptedExecutor::new()
            .fail(fixtures::MEMORY_COUNTERS, ExecError::Transient("lock timeout".into()));
        let target = Target::parse("Server=db01").unwrap();
        assert!(collect(ctx(&exec, &target)).await.is_err());
    }

    #[tokio::test]
    async fn test_low_memory_signal_sets_pressure() {
        let exec = ScriptedExecutor::new()
            .on(fixtures::MEMORY_COUNTERS, fixtures::memory_row(100))
            .on(
                fixtures::MEMORY_CLERKS,
                row(vec![("low_memory_signal", json!(1))]),
            );
        let target = Target::parse("Server=db01").unwrap();
        let fact = collect(ctx(&exec, &target)).await.unwrap();
        assert!(fact.memory_pressure);
    }
}
