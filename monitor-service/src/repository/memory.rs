//! In-process issue repository, used when no issue store is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::errors::{AppError, AppResult};
use common::models::{server_key, Issue};

use super::{IssueFilter, IssueRepository, Recorded};

#[derive(Default)]
pub struct InMemoryIssueRepository {
    issues: RwLock<HashMap<String, Issue>>,
}

impl InMemoryIssueRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IssueRepository for InMemoryIssueRepository {
    async fn list(&self, filter: &IssueFilter) -> AppResult<Vec<Issue>> {
        let key = filter.server_name.as_deref().map(server_key);
        let issues = self.issues.read().await;
        let mut out: Vec<Issue> = issues
            .values()
            .filter(|i| filter.include_resolved || !i.resolved)
            .filter(|i| key.as_ref().map_or(true, |k| server_key(&i.server_name) == *k))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(out)
    }

    async fn get(&self, id: &str) -> AppResult<Issue> {
        self.issues
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::IssueNotFound(id.to_string()))
    }

    async fn record(&self, issues: Vec<Issue>) -> AppResult<Vec<Recorded>> {
        let mut stored = self.issues.write().await;
        let mut recorded = Vec::with_capacity(issues.len());
        for issue in issues {
            let key = issue.dedup_key();
            let open = stored
                .values_mut()
                .find(|existing| !existing.resolved && existing.dedup_key() == key);
            match open {
                Some(existing) => {
                    existing.severity = issue.severity;
                    existing.message = issue.message;
                    recorded.push(Recorded {
                        issue: existing.clone(),
                        is_new: false,
                    });
                }
                None => {
                    stored.insert(issue.id.clone(), issue.clone());
                    recorded.push(Recorded { issue, is_new: true });
                }
            }
        }
        Ok(recorded)
    }

    async fn resolve(&self, id: &str, at: DateTime<Utc>) -> AppResult<Issue> {
        let mut stored = self.issues.write().await;
        let issue = stored
            .get_mut(id)
            .ok_or_else(|| AppError::IssueNotFound(id.to_string()))?;
        if !issue.resolved {
            issue.resolved = true;
            issue.resolved_at = Some(at);
        }
        Ok(issue.clone())
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.issues
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::IssueNotFound(id.to_string()))
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let mut stored = self.issues.write().await;
        let before = stored.len();
        stored.retain(|_, i| !(i.resolved && i.resolved_at.map_or(false, |at| at < cutoff)));
        Ok((before - stored.len()) as u64)
    }
}
