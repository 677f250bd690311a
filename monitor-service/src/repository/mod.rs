//! Issue storage.
//!
//! At most one unresolved issue exists per (server, database, type): a
//! repeat detection of an open problem is absorbed by `record`, which
//! refreshes the open record's severity and message and keeps its id.

mod memory;
mod sqlite;

pub use memory::InMemoryIssueRepository;
pub use sqlite::SqliteIssueRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::errors::AppResult;
use common::models::Issue;

/// Outcome of recording one detected issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    /// The stored issue: the new record, or the open one that absorbed it.
    pub issue: Issue,
    pub is_new: bool,
}

/// Listing filter.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    /// Case-insensitive server display name.
    pub server_name: Option<String>,
    pub include_resolved: bool,
}

#[async_trait]
pub trait IssueRepository: Send + Sync {
    /// Issues matching the filter, newest first.
    async fn list(&self, filter: &IssueFilter) -> AppResult<Vec<Issue>>;

    async fn get(&self, id: &str) -> AppResult<Issue>;

    /// Stores each issue unless an equivalent one is open. Returns one
    /// `Recorded` per input, in order, carrying the id that was stored.
    async fn record(&self, issues: Vec<Issue>) -> AppResult<Vec<Recorded>>;

    /// Marks an issue resolved. Resolving twice keeps the first timestamp.
    async fn resolve(&self, id: &str, at: DateTime<Utc>) -> AppResult<Issue>;

    async fn delete(&self, id: &str) -> AppResult<()>;

    /// Deletes resolved issues resolved before `cutoff`; returns the count.
    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

#[cfg(test)]
mod contract {
    //! Behaviour every repository must share.

    use chrono::Duration;

    use common::errors::AppError;
    use common::models::{IssueSeverity, IssueType};

    use super::*;

    fn issue(server: &str, t: IssueType) -> Issue {
        Issue::new(server, t, IssueSeverity::High, "msg", Utc::now())
    }

    fn new_ones(recorded: &[Recorded]) -> Vec<&Issue> {
        recorded.iter().filter(|r| r.is_new).map(|r| &r.issue).collect()
    }

    pub async fn dedups_open_issues(repo: &dyn IssueRepository) {
        let first = repo
            .record(vec![issue("DB01", IssueType::HighCpu)])
            .await
            .unwrap();
        assert_eq!(new_ones(&first).len(), 1);
        let first_id = first[0].issue.id.clone();

        // Same server (case differs), same type: absorbed into the open record.
        let mut escalated = issue("db01", IssueType::HighCpu);
        escalated.severity = IssueSeverity::Critical;
        escalated.message = "cpu 97%".into();
        let again = repo
            .record(vec![escalated, issue("db01", IssueType::LowMemory)])
            .await
            .unwrap();
        assert_eq!(again.len(), 2);
        assert!(!again[0].is_new);
        assert_eq!(again[0].issue.id, first_id);
        assert_eq!(again[0].issue.severity, IssueSeverity::Critical);
        assert!(again[1].is_new);
        assert_eq!(again[1].issue.issue_type, IssueType::LowMemory);

        // The returned id of an absorbed issue can be looked up.
        let stored = repo.get(&again[0].issue.id).await.unwrap();
        assert_eq!(stored.message, "cpu 97%");

        // Database-scoped issues are distinct from server-wide ones.
        let scoped = repo
            .record(vec![issue("db01", IssueType::HighCpu).in_database("Sales")])
            .await
            .unwrap();
        assert_eq!(new_ones(&scoped).len(), 1);

        // Duplicates within one batch collapse too.
        let batch = repo
            .record(vec![
                issue("db02", IssueType::Deadlock),
                issue("db02", IssueType::Deadlock),
            ])
            .await
            .unwrap();
        assert_eq!(new_ones(&batch).len(), 1);
        assert_eq!(batch[0].issue.id, batch[1].issue.id);

        // Once resolved, the same problem may be recorded again.
        repo.resolve(&first_id, Utc::now()).await.unwrap();
        let reopened = repo
            .record(vec![issue("db01", IssueType::HighCpu)])
            .await
            .unwrap();
        assert_eq!(new_ones(&reopened).len(), 1);
        assert_ne!(reopened[0].issue.id, first_id);
    }

    pub async fn filters_and_orders(repo: &dyn IssueRepository) {
        let mut older = issue("db01", IssueType::HighCpu);
        older.detected_at = Utc::now() - Duration::minutes(10);
        let newer = issue("db01", IssueType::LowMemory);
        let other = issue("db02", IssueType::HighCpu);
        repo.record(vec![older.clone(), newer.clone(), other])
            .await
            .unwrap();
        repo.resolve(&older.id, Utc::now()).await.unwrap();

        let open = repo
            .list(&IssueFilter {
                server_name: Some("DB01".into()),
                include_resolved: false,
            })
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, newer.id);

        let all = repo
            .list(&IssueFilter {
                server_name: Some("db01".into()),
                include_resolved: true,
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer.id);
        assert!(all[1].resolved);

        let everything = repo
            .list(&IssueFilter {
                server_name: None,
                include_resolved: true,
            })
            .await
            .unwrap();
        assert_eq!(everything.len(), 3);
    }

    pub async fn resolve_delete_purge(repo: &dyn IssueRepository) {
        let a = issue("db01", IssueType::HighCpu);
        let b = issue("db01", IssueType::Blocking);
        let c = issue("db01", IssueType::Deadlock);
        repo.record(vec![a.clone(), b.clone(), c.clone()])
            .await
            .unwrap();

        let first_at = Utc::now() - Duration::days(40);
        let resolved = repo.resolve(&a.id, first_at).await.unwrap();
        assert!(resolved.resolved);
        let again = repo.resolve(&a.id, Utc::now()).await.unwrap();
        assert_eq!(
            again.resolved_at.map(|t| t.timestamp()),
            Some(first_at.timestamp())
        );
        repo.resolve(&b.id, Utc::now()).await.unwrap();

        let purged = repo
            .purge_resolved_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(matches!(repo.get(&a.id).await, Err(AppError::IssueNotFound(_))));
        assert!(repo.get(&b.id).await.unwrap().resolved);

        repo.delete(&c.id).await.unwrap();
        assert!(matches!(repo.delete(&c.id).await, Err(AppError::IssueNotFound(_))));
        assert!(matches!(
            repo.resolve("missing", Utc::now()).await,
            Err(AppError::IssueNotFound(_))
        ));
    }
}
