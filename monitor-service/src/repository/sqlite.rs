//! SQLite-backed issue repository.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use common::errors::{AppError, AppResult};
use common::models::{server_key, Issue};

use super::{IssueFilter, IssueRepository, Recorded};

/// Row from the `issues` table.
#[derive(sqlx::FromRow)]
struct IssueRow {
    id: String,
    server_name: String,
    database_name: Option<String>,
    issue_type: String,
    severity: String,
    message: String,
    detected_at: String,
    resolved: bool,
    resolved_at: Option<String>,
}

impl IssueRow {
    fn into_issue(self) -> AppResult<Issue> {
        Ok(Issue {
            id: self.id,
            server_name: self.server_name,
            database_name: self.database_name,
            issue_type: self.issue_type.parse().map_err(AppError::Storage)?,
            severity: self.severity.parse().map_err(AppError::Storage)?,
            message: self.message,
            detected_at: parse_ts(&self.detected_at)?,
            resolved: self.resolved,
            resolved_at: self.resolved_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, server_name, database_name, issue_type, severity, \
     message, detected_at, resolved, resolved_at FROM issues";

// Fixed-width UTC timestamps compare correctly as text.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Storage(format!("bad timestamp '{}': {}", s, e)))
}

fn storage(context: &str) -> impl Fn(sqlx::Error) -> AppError + '_ {
    move |e| AppError::Storage(format!("{}: {}", context, e))
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

pub struct SqliteIssueRepository {
    pool: SqlitePool,
}

impl SqliteIssueRepository {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists.
    pub async fn connect(url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage("Invalid issue store url"))?
            .create_if_missing(true);
        // Every connection to an in-memory database sees its own database,
        // so the pool pins exactly one connection and never recycles it.
        let pool_options = if is_memory_url(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(storage("Failed to open issue store"))?;

        let repo = Self { pool };
        repo.ensure_table().await?;
        Ok(repo)
    }

    async fn ensure_table(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS issues (
                id            TEXT    NOT NULL PRIMARY KEY,
                server_name   TEXT    NOT NULL,
                server_key    TEXT    NOT NULL,
                database_name TEXT,
                issue_type    TEXT    NOT NULL,
                severity      TEXT    NOT NULL,
                message       TEXT    NOT NULL,
                detected_at   TEXT    NOT NULL,
                resolved      INTEGER NOT NULL DEFAULT 0,
                resolved_at   TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to create issues table"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_issues_open ON issues (server_key, issue_type, resolved)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to create issues index"))?;

        tracing::info!("Issue table ensured");
        Ok(())
    }
}

#[async_trait]
impl IssueRepository for SqliteIssueRepository {
    async fn list(&self, filter: &IssueFilter) -> AppResult<Vec<Issue>> {
        let sql = format!(
            "{} WHERE (?1 IS NULL OR server_key = ?1) AND (?2 OR resolved = 0) \
             ORDER BY detected_at DESC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, IssueRow>(&sql)
            .bind(filter.server_name.as_deref().map(server_key))
            .bind(filter.include_resolved)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("Failed to list issues"))?;
        rows.into_iter().map(IssueRow::into_issue).collect()
    }

    async fn get(&self, id: &str) -> AppResult<Issue> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        sqlx::query_as::<_, IssueRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("Failed to read issue"))?
            .ok_or_else(|| AppError::IssueNotFound(id.to_string()))?
            .into_issue()
    }

    async fn record(&self, issues: Vec<Issue>) -> AppResult<Vec<Recorded>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage("Failed to begin transaction"))?;
        let mut recorded = Vec::with_capacity(issues.len());

        for issue in issues {
            let key = server_key(&issue.server_name);
            // `IS` treats two NULL database names as equal.
            let open: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM issues
                 WHERE server_key = ? AND database_name IS ? AND issue_type = ? AND resolved = 0
                 LIMIT 1",
            )
            .bind(&key)
            .bind(&issue.database_name)
            .bind(issue.issue_type.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage("Failed to check open issues"))?;

            if let Some((id,)) = open {
                sqlx::query("UPDATE issues SET severity = ?, message = ? WHERE id = ?")
                    .bind(issue.severity.as_str())
                    .bind(&issue.message)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage("Failed to refresh open issue"))?;
                let row = sqlx::query_as::<_, IssueRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
                    .bind(&id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(storage("Failed to read open issue"))?;
                recorded.push(Recorded {
                    issue: row.into_issue()?,
                    is_new: false,
                });
                continue;
            }

            sqlx::query(
                "INSERT INTO issues (id, server_name, server_key, database_name, issue_type,
                                     severity, message, detected_at, resolved, resolved_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&issue.id)
            .bind(&issue.server_name)
            .bind(&key)
            .bind(&issue.database_name)
            .bind(issue.issue_type.as_str())
            .bind(issue.severity.as_str())
            .bind(&issue.message)
            .bind(ts(issue.detected_at))
            .bind(issue.resolved)
            .bind(issue.resolved_at.map(ts))
            .execute(&mut *tx)
            .await
            .map_err(storage("Failed to save issue"))?;
            recorded.push(Recorded { issue, is_new: true });
        }

        tx.commit()
            .await
            .map_err(storage("Failed to commit issues"))?;
        Ok(recorded)
    }

    async fn resolve(&self, id: &str, at: DateTime<Utc>) -> AppResult<Issue> {
        let result = sqlx::query(
            "UPDATE issues SET resolved = 1, resolved_at = COALESCE(resolved_at, ?) WHERE id = ?",
        )
        .bind(ts(at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage("Failed to resolve issue"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::IssueNotFound(id.to_string()));
        }
        self.get(id).await
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM issues WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage("Failed to delete issue"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::IssueNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM issues WHERE resolved = 1 AND resolved_at < ?")
            .bind(ts(cutoff))
            .execute(&self.pool)
            .await
            .map_err(storage("Failed to purge issues"))?;
        Ok(result.rows_affected())
    }
}
