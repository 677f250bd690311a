//! Detected issue models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::utils::IdGenerator;

/// Kind of detected problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum IssueType {
    HighCpu,
    LowMemory,
    Blocking,
    Deadlock,
    MissingIndex,
    Fragmentation,
    LongRunningQuery,
    BackupOverdue,
    ConnectionFailure,
}

impl IssueType {
    /// Stable name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::HighCpu => "HighCpu",
            IssueType::LowMemory => "LowMemory",
            IssueType::Blocking => "Blocking",
            IssueType::Deadlock => "Deadlock",
            IssueType::MissingIndex => "MissingIndex",
            IssueType::Fragmentation => "Fragmentation",
            IssueType::LongRunningQuery => "LongRunningQuery",
            IssueType::BackupOverdue => "BackupOverdue",
            IssueType::ConnectionFailure => "ConnectionFailure",
        }
    }

    /// Whether the issue is a lock contention problem.
    pub fn is_blocking(&self) -> bool {
        matches!(self, IssueType::Blocking | IssueType::Deadlock)
    }
}

impl FromStr for IssueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "HighCpu" => IssueType::HighCpu,
            "LowMemory" => IssueType::LowMemory,
            "Blocking" => IssueType::Blocking,
            "Deadlock" => IssueType::Deadlock,
            "MissingIndex" => IssueType::MissingIndex,
            "Fragmentation" => IssueType::Fragmentation,
            "LongRunningQuery" => IssueType::LongRunningQuery,
            "BackupOverdue" => IssueType::BackupOverdue,
            "ConnectionFailure" => IssueType::ConnectionFailure,
            other => return Err(format!("unknown issue type: {}", other)),
        })
    }
}

/// Issue severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    /// Stable name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Low => "Low",
            IssueSeverity::Medium => "Medium",
            IssueSeverity::High => "High",
            IssueSeverity::Critical => "Critical",
        }
    }
}

impl FromStr for IssueSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Low" => IssueSeverity::Low,
            "Medium" => IssueSeverity::Medium,
            "High" => IssueSeverity::High,
            "Critical" => IssueSeverity::Critical,
            other => return Err(format!("unknown severity: {}", other)),
        })
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected problem on a monitored server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub server_name: String,
    /// Database the issue belongs to; `None` for server-wide issues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Creates an open issue with a fresh id.
    pub fn new(
        server_name: impl Into<String>,
        issue_type: IssueType,
        severity: IssueSeverity,
        message: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IdGenerator::issue_id(),
            server_name: server_name.into(),
            database_name: None,
            issue_type,
            severity,
            message: message.into(),
            detected_at,
            resolved: false,
            resolved_at: None,
        }
    }

    /// Scopes the issue to a database.
    pub fn in_database(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = Some(database_name.into());
        self
    }

    /// Key under which at most one unresolved issue is kept.
    pub fn dedup_key(&self) -> (String, Option<String>, IssueType) {
        (
            self.server_name.to_lowercase(),
            self.database_name.clone(),
            self.issue_type,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(IssueSeverity::Low < IssueSeverity::Medium);
        assert!(IssueSeverity::High < IssueSeverity::Critical);
    }

    #[test]
    fn test_type_round_trips_through_storage_name() {
        for t in [IssueType::HighCpu, IssueType::BackupOverdue, IssueType::Deadlock] {
            assert_eq!(t.as_str().parse::<IssueType>(), Ok(t));
        }
        assert!("Nope".parse::<IssueType>().is_err());
    }

    #[test]
    fn test_issue_serializes_type_field() {
        let issue = Issue::new(
            "db01",
            IssueType::Blocking,
            IssueSeverity::High,
            "blocked",
            Utc::now(),
        )
        .in_database("Sales");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "Blocking");
        assert_eq!(json["severity"], "High");
        assert_eq!(json["databaseName"], "Sales");
        assert_eq!(json["resolved"], false);
    }
}
