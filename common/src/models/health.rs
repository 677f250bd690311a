//! Health verdict models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Health of one dimension, ordered from best to worst so the worst of
/// several statuses is their `max`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Summary line shown for an overall status.
    pub fn summary(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "All monitored dimensions are within normal thresholds",
            HealthStatus::Warning => "One or more dimensions need attention",
            HealthStatus::Critical => "Immediate attention required: a dimension is in critical state",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Warning => write!(f, "Warning"),
            HealthStatus::Critical => write!(f, "Critical"),
        }
    }
}

/// Health verdict derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthAssessment {
    pub connectivity: HealthStatus,
    pub cpu: HealthStatus,
    pub memory: HealthStatus,
    pub disk_io: HealthStatus,
    pub blocking: HealthStatus,
    /// Worst of the dimension statuses.
    pub overall: HealthStatus,
    pub summary: String,
    pub evaluated_at: DateTime<Utc>,
}

impl HealthAssessment {
    /// Dimension statuses in a fixed order.
    pub fn dimensions(&self) -> [HealthStatus; 5] {
        [
            self.connectivity,
            self.cpu,
            self.memory,
            self.disk_io,
            self.blocking,
        ]
    }
}

/// Two-tier thresholds used by the evaluator and the issue detector.
/// Comparisons are strict: a value equal to a threshold does not cross it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthThresholds {
    pub cpu_warning_percent: f64,
    pub cpu_critical_percent: f64,
    /// PLE below this is Warning.
    pub ple_warning_seconds: i64,
    /// PLE below this is Critical.
    pub ple_critical_seconds: i64,
    pub io_latency_warning_ms: f64,
    pub io_latency_critical_ms: f64,
    /// Locking wait time above this raises a Blocking issue.
    pub blocking_wait_warning_ms: i64,
    /// Locking wait time above this makes the Blocking issue High severity.
    pub blocking_wait_critical_ms: i64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_warning_percent: 60.0,
            cpu_critical_percent: 80.0,
            ple_warning_seconds: 600,
            ple_critical_seconds: 300,
            io_latency_warning_ms: 20.0,
            io_latency_critical_ms: 50.0,
            blocking_wait_warning_ms: 10_000,
            blocking_wait_critical_ms: 60_000,
        }
    }
}
