//! On-demand issue analyzers.
//!
//! Each analyzer runs one diagnostic query, compares against a fixed
//! threshold and emits issues. They run concurrently and a failing analyzer
//! only loses its own findings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use common::models::{Issue, IssueSeverity, IssueType, MonitoringSettings, Target};
use common::utils::SqlIdentifier;

use crate::executor::{ExecResult, SqlExecutor, SqlParam};

/// Blocked sessions waiting longer than this are High severity.
const BLOCKED_WAIT_HIGH_MS: i64 = 30_000;
/// Missing index suggestions below this estimated impact are ignored.
const MISSING_INDEX_MIN_IMPACT: f64 = 50.0;
const MISSING_INDEX_HIGH_IMPACT: f64 = 80.0;
const MISSING_INDEX_LIMIT: i64 = 10;
const LONG_RUNNING_LIMIT: i64 = 10;
/// Index fragmentation thresholds, percent.
const FRAGMENTATION_MIN_PERCENT: f64 = 30.0;
const FRAGMENTATION_HIGH_PERCENT: f64 = 70.0;
/// Indexes smaller than this are not worth rebuilding.
const FRAGMENTATION_MIN_PAGES: i64 = 1000;
const FRAGMENTATION_MAX_DATABASES: usize = 20;
/// Hours without a full backup before a database is overdue.
const BACKUP_OVERDUE_HOURS: i64 = 24;

const BLOCKING_SQL: &str = r#"
SELECT COUNT(*) AS blocked_sessions,
       ISNULL(MAX(wait_time), 0) AS longest_wait_ms,
       MAX(DB_NAME(database_id)) AS database_name
FROM sys.dm_exec_requests
WHERE blocking_session_id <> 0"#;

const DEADLOCK_SQL: &str = r#"
SELECT cntr_value AS deadlocks
FROM sys.dm_os_performance_counters
WHERE counter_name = N'Number of Deadlocks/sec' AND instance_name = N'_Total'"#;

const LONG_RUNNING_SQL: &str = r#"
SELECT TOP (@P2)
    r.session_id,
    DB_NAME(r.database_id) AS database_name,
    r.total_elapsed_time / 1000 AS elapsed_seconds,
    r.command,
    LEFT(t.[text], 200) AS query_text
FROM sys.dm_exec_requests AS r
CROSS APPLY sys.dm_exec_sql_text(r.sql_handle) AS t
WHERE r.session_id > 50 AND r.session_id <> @@SPID
  AND r.total_elapsed_time > @P1 * 1000
ORDER BY r.total_elapsed_time DESC"#;

const MISSING_INDEX_SQL: &str = r#"
SELECT TOP (@P1)
    DB_NAME(mid.database_id) AS database_name,
    mid.[statement] AS table_name,
    mid.equality_columns,
    mid.inequality_columns,
    mid.included_columns,
    migs.avg_user_impact,
    migs.user_seeks + migs.user_scans AS uses
FROM sys.dm_db_missing_index_group_stats AS migs
JOIN sys.dm_db_missing_index_groups AS mig ON mig.index_group_handle = migs.group_handle
JOIN sys.dm_db_missing_index_details AS mid ON mid.index_handle = mig.index_handle
WHERE migs.avg_user_impact > @P2
ORDER BY migs.avg_total_user_cost * migs.avg_user_impact * (migs.user_seeks + migs.user_scans) DESC"#;

const USER_DATABASES_SQL: &str = r#"
SELECT name FROM sys.databases
WHERE database_id > 4 AND [state] = 0 AND is_read_only = 0
ORDER BY name"#;

const BACKUP_SQL: &str = r#"
SELECT d.name AS database_name,
       DATEDIFF(HOUR, MAX(b.backup_finish_date), SYSDATETIME()) AS hours_since_backup
FROM sys.databases AS d
LEFT JOIN msdb.dbo.backupset AS b ON b.database_name = d.name AND b.[type] = 'D'
WHERE d.name <> N'tempdb' AND d.[state] = 0
GROUP BY d.name
HAVING MAX(b.backup_finish_date) IS NULL
    OR MAX(b.backup_finish_date) < DATEADD(HOUR, -CAST(@P1 AS int), SYSDATETIME())"#;

/// Fragmentation query for one database. The name is interpolated as a
/// bracketed identifier, so it must pass the identifier grammar first.
fn fragmentation_sql(database: &str) -> common::errors::AppResult<String> {
    let db = SqlIdentifier::bracketed(database)?;
    Ok(format!(
        r#"
SELECT TOP (10)
    o.name AS table_name,
    i.name AS index_name,
    ps.avg_fragmentation_in_percent AS fragmentation,
    ps.page_count
FROM sys.dm_db_index_physical_stats(DB_ID(@P1), NULL, NULL, NULL, 'LIMITED') AS ps
JOIN {db}.sys.indexes AS i ON i.[object_id] = ps.[object_id] AND i.index_id = ps.index_id
JOIN {db}.sys.objects AS o ON o.[object_id] = ps.[object_id]
WHERE ps.avg_fragmentation_in_percent > @P2 AND ps.page_count > @P3 AND i.name IS NOT NULL
ORDER BY ps.avg_fragmentation_in_percent DESC"#
    ))
}

pub struct IssueAnalyzer {
    executor: Arc<dyn SqlExecutor>,
    timeout: Duration,
    /// Last deadlock counter seen per server key.
    deadlock_counters: Mutex<HashMap<String, i64>>,
}

impl IssueAnalyzer {
    pub fn new(executor: Arc<dyn SqlExecutor>, timeout: Duration) -> Self {
        Self {
            executor,
            timeout,
            deadlock_counters: Mutex::new(HashMap::new()),
        }
    }

    /// Runs every analyzer against `target`.
    pub async fn analyze(&self, target: &Target, settings: &MonitoringSettings) -> Vec<Issue> {
        let at = Utc::now();
        let (blocking, deadlocks, long_running, missing, fragmentation, backups) = tokio::join!(
            self.blocking(target, at),
            self.deadlocks(target, at),
            self.long_running(target, settings.long_running_query_seconds, at),
            self.missing_indexes(target, at),
            self.fragmentation(target, at),
            self.backups(target, at),
        );

        let mut issues = Vec::new();
        for (name, result) in [
            ("blocking", blocking),
            ("deadlocks", deadlocks),
            ("long_running", long_running),
            ("missing_indexes", missing),
            ("fragmentation", fragmentation),
            ("backups", backups),
        ] {
            match result {
                Ok(found) => {
                    debug!(server = %target, analyzer = name, count = found.len(), "Analyzer finished");
                    issues.extend(found);
                }
                Err(e) => warn!(server = %target, analyzer = name, error = %e, "Analyzer failed"),
            }
        }
        issues
    }

    async fn query(&self, target: &Target, sql: &str, params: &[SqlParam]) -> ExecResult<Vec<crate::executor::SqlRow>> {
        self.executor.query(target, sql, params, self.timeout).await
    }

    async fn blocking(&self, target: &Target, at: DateTime<Utc>) -> ExecResult<Vec<Issue>> {
        let rows = self.query(target, BLOCKING_SQL, &[]).await?;
        let Some(row) = rows.first() else {
            return Ok(Vec::new());
        };
        let blocked = row.i64("blocked_sessions");
        if blocked == 0 {
            return Ok(Vec::new());
        }
        let longest = row.i64("longest_wait_ms");
        let severity = if longest > BLOCKED_WAIT_HIGH_MS {
            IssueSeverity::High
        } else {
            IssueSeverity::Medium
        };
        let mut issue = Issue::new(
            target.display_name(),
            IssueType::Blocking,
            severity,
            format!("{} session(s) blocked, longest wait {}ms", blocked, longest),
            at,
        );
        if let Some(db) = row.text("database_name") {
            issue = issue.in_database(db);
        }
        Ok(vec![issue])
    }

    async fn deadlocks(&self, target: &Target, at: DateTime<Utc>) -> ExecResult<Vec<Issue>> {
        let rows = self.query(target, DEADLOCK_SQL, &[]).await?;
        let count = rows.first().map(|r| r.i64("deadlocks")).unwrap_or(0);
        let previous = self
            .deadlock_counters
            .lock()
            .await
            .insert(target.key().to_string(), count);

        // The counter is cumulative since the instance started; only growth
        // since the previous run is news. A smaller value means a restart.
        let message = match previous {
            None if count > 0 => format!("{} deadlock(s) recorded since the last restart", count),
            Some(prev) if count > prev => format!("{} new deadlock(s) since the last check", count - prev),
            Some(prev) if count < prev && count > 0 => {
                format!("{} deadlock(s) recorded since the last restart", count)
            }
            _ => return Ok(Vec::new()),
        };
        Ok(vec![Issue::new(
            target.display_name(),
            IssueType::Deadlock,
            IssueSeverity::Medium,
            message,
            at,
        )])
    }

    async fn long_running(
        &self,
        target: &Target,
        threshold_secs: u64,
        at: DateTime<Utc>,
    ) -> ExecResult<Vec<Issue>> {
        let threshold = i64::try_from(threshold_secs).unwrap_or(i64::MAX / 1000);
        let rows = self
            .query(
                target,
                LONG_RUNNING_SQL,
                &[SqlParam::Int(threshold), SqlParam::Int(LONG_RUNNING_LIMIT)],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let elapsed = row.i64("elapsed_seconds");
                let severity = if elapsed > threshold.saturating_mul(10) {
                    IssueSeverity::High
                } else {
                    IssueSeverity::Medium
                };
                let mut issue = Issue::new(
                    target.display_name(),
                    IssueType::LongRunningQuery,
                    severity,
                    format!(
                        "Session {} has been running {} for {}s: {}",
                        row.i64("session_id"),
                        row.text("command").unwrap_or_default().trim(),
                        elapsed,
                        row.text("query_text").unwrap_or_default().trim()
                    ),
                    at,
                );
                if let Some(db) = row.text("database_name") {
                    issue = issue.in_database(db);
                }
                issue
            })
            .collect())
    }

    async fn missing_indexes(&self, target: &Target, at: DateTime<Utc>) -> ExecResult<Vec<Issue>> {
        let rows = self
            .query(
                target,
                MISSING_INDEX_SQL,
                &[
                    SqlParam::Int(MISSING_INDEX_LIMIT),
                    SqlParam::Float(MISSING_INDEX_MIN_IMPACT),
                ],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let impact = row.f64("avg_user_impact");
                let severity = if impact > MISSING_INDEX_HIGH_IMPACT {
                    IssueSeverity::Medium
                } else {
                    IssueSeverity::Low
                };
                let columns = [
                    row.text("equality_columns"),
                    row.text("inequality_columns"),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ");
                let mut message = format!(
                    "Missing index on {} ({}) with estimated impact {:.0}%",
                    row.text("table_name").unwrap_or_default(),
                    columns,
                    impact
                );
                if let Some(include) = row.text("included_columns") {
                    message.push_str(&format!(", include {}", include));
                }
                let mut issue = Issue::new(
                    target.display_name(),
                    IssueType::MissingIndex,
                    severity,
                    message,
                    at,
                );
                if let Some(db) = row.text("database_name") {
                    issue = issue.in_database(db);
                }
                issue
            })
            .collect())
    }

    async fn fragmentation(&self, target: &Target, at: DateTime<Utc>) -> ExecResult<Vec<Issue>> {
        let databases = self.query(target, USER_DATABASES_SQL, &[]).await?;
        let names: Vec<String> = databases
            .iter()
            .filter_map(|r| r.text("name"))
            .filter(|name| {
                let ok = SqlIdentifier::is_valid(name);
                if !ok {
                    warn!(server = %target, database = %name, "Skipping database with unsupported name");
                }
                ok
            })
            .take(FRAGMENTATION_MAX_DATABASES)
            .collect();

        let checks = names.iter().map(|db| self.fragmentation_in(target, db, at));
        let mut issues = Vec::new();
        for (db, result) in names.iter().zip(join_all(checks).await) {
            match result {
                Ok(found) => issues.extend(found),
                Err(e) => warn!(server = %target, database = %db, error = %e, "Fragmentation check failed"),
            }
        }
        Ok(issues)
    }

    async fn fragmentation_in(
        &self,
        target: &Target,
        database: &str,
        at: DateTime<Utc>,
    ) -> ExecResult<Vec<Issue>> {
        let sql = fragmentation_sql(database)
            .map_err(|e| crate::executor::ExecError::Query(e.to_string()))?;
        let rows = self
            .query(
                target,
                &sql,
                &[
                    SqlParam::Text(database.to_string()),
                    SqlParam::Float(FRAGMENTATION_MIN_PERCENT),
                    SqlParam::Int(FRAGMENTATION_MIN_PAGES),
                ],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let percent = row.f64("fragmentation");
                let severity = if percent > FRAGMENTATION_HIGH_PERCENT {
                    IssueSeverity::Medium
                } else {
                    IssueSeverity::Low
                };
                Issue::new(
                    target.display_name(),
                    IssueType::Fragmentation,
                    severity,
                    format!(
                        "Index {} on {} is {:.1}% fragmented ({} pages)",
                        row.text("index_name").unwrap_or_default(),
                        row.text("table_name").unwrap_or_default(),
                        percent,
                        row.i64("page_count")
                    ),
                    at,
                )
                .in_database(database)
            })
            .collect())
    }

    async fn backups(&self, target: &Target, at: DateTime<Utc>) -> ExecResult<Vec<Issue>> {
        let rows = self
            .query(target, BACKUP_SQL, &[SqlParam::Int(BACKUP_OVERDUE_HOURS)])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let db = row.text("database_name")?;
                let (severity, message) = if row.is_null("hours_since_backup") {
                    (IssueSeverity::High, format!("Database {} has never had a full backup", db))
                } else {
                    (
                        IssueSeverity::Medium,
                        format!(
                            "Last full backup of {} was {} hours ago",
                            db,
                            row.i64("hours_since_backup")
                        ),
                    )
                };
                Some(
                    Issue::new(target.display_name(), IssueType::BackupOverdue, severity, message, at)
                        .in_database(db),
                )
            })
            .collect())
    }
}
