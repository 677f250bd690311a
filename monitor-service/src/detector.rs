//! Per-tick issue detection.
//!
//! Maps threshold crossings in a snapshot to `Issue`s. Facts that failed to
//! collect or are switched off raise nothing; an unreachable server raises a
//! single `ConnectionFailure`.

use common::models::{
    HealthStatus, HealthThresholds, Issue, IssueSeverity, IssueType, MetricSnapshot, WaitCategory,
};

use crate::evaluator::{cpu_status, memory_status};

pub fn detect(snapshot: &MetricSnapshot, t: &HealthThresholds) -> Vec<Issue> {
    let server = snapshot.server_name.as_str();
    let at = snapshot.collected_at;

    if !snapshot.is_connected() {
        let reason = snapshot
            .connectivity
            .error
            .as_deref()
            .unwrap_or("unknown error");
        return vec![Issue::new(
            server,
            IssueType::ConnectionFailure,
            IssueSeverity::Critical,
            format!("Cannot connect to {}: {}", server, reason),
            at,
        )];
    }

    let mut issues = Vec::new();

    if snapshot.cpu.is_available() {
        let percent = snapshot.cpu.utilization_percent;
        let severity = match cpu_status(percent, t) {
            HealthStatus::Critical => Some(IssueSeverity::Critical),
            HealthStatus::Warning => Some(IssueSeverity::Medium),
            HealthStatus::Healthy => None,
        };
        if let Some(severity) = severity {
            issues.push(Issue::new(
                server,
                IssueType::HighCpu,
                severity,
                format!("SQL Server CPU utilization is {:.1}%", percent),
                at,
            ));
        }
    }

    if snapshot.memory.is_available() {
        let memory = &snapshot.memory;
        let status = memory_status(memory.page_life_expectancy_seconds, t);
        if status != HealthStatus::Healthy || memory.memory_pressure {
            let severity = if status == HealthStatus::Critical {
                IssueSeverity::Critical
            } else {
                IssueSeverity::Medium
            };
            let mut message = format!(
                "Page life expectancy is {}s",
                memory.page_life_expectancy_seconds
            );
            if memory.memory_pressure {
                message.push_str("; memory pressure signalled");
            }
            issues.push(Issue::new(server, IssueType::LowMemory, severity, message, at));
        }
    }

    // One Blocking issue, named after the worst lock wait.
    let worst_lock = snapshot
        .wait_statistics
        .iter()
        .filter(|w| w.category == WaitCategory::Locking && w.wait_time_ms > t.blocking_wait_warning_ms)
        .max_by_key(|w| w.wait_time_ms);
    if let Some(wait) = worst_lock {
        let severity = if wait.wait_time_ms > t.blocking_wait_critical_ms {
            IssueSeverity::High
        } else {
            IssueSeverity::Medium
        };
        issues.push(Issue::new(
            server,
            IssueType::Blocking,
            severity,
            format!(
                "Lock waits on {} total {}ms across {} tasks",
                wait.wait_type, wait.wait_time_ms, wait.waiting_tasks_count
            ),
            at,
        ));
    }

    issues
}
