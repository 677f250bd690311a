//! Health evaluation.
//!
//! Pure functions from a snapshot (plus the tick's issues) to a
//! `HealthAssessment`. Comparisons are strict: a value sitting exactly on a
//! threshold does not cross it.

use common::models::{HealthAssessment, HealthStatus, HealthThresholds, Issue, IssueSeverity, MetricSnapshot};

pub fn cpu_status(utilization_percent: f64, t: &HealthThresholds) -> HealthStatus {
    if utilization_percent > t.cpu_critical_percent {
        HealthStatus::Critical
    } else if utilization_percent > t.cpu_warning_percent {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

pub fn memory_status(page_life_expectancy: i64, t: &HealthThresholds) -> HealthStatus {
    if page_life_expectancy < t.ple_critical_seconds {
        HealthStatus::Critical
    } else if page_life_expectancy < t.ple_warning_seconds {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

pub fn disk_status(max_latency_ms: f64, t: &HealthThresholds) -> HealthStatus {
    if max_latency_ms > t.io_latency_critical_ms {
        HealthStatus::Critical
    } else if max_latency_ms > t.io_latency_warning_ms {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Critical if any unresolved lock contention issue is High or worse,
/// Warning if there is any other.
pub fn blocking_status(issues: &[Issue]) -> HealthStatus {
    issues
        .iter()
        .filter(|i| !i.resolved && i.issue_type.is_blocking())
        .map(|i| {
            if i.severity >= IssueSeverity::High {
                HealthStatus::Critical
            } else {
                HealthStatus::Warning
            }
        })
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

/// Evaluates a snapshot. Deterministic: `evaluated_at` is the snapshot's
/// collection time, so equal inputs give equal assessments.
pub fn evaluate(snapshot: &MetricSnapshot, issues: &[Issue], t: &HealthThresholds) -> HealthAssessment {
    if !snapshot.is_connected() {
        return HealthAssessment {
            connectivity: HealthStatus::Critical,
            cpu: HealthStatus::Critical,
            memory: HealthStatus::Critical,
            disk_io: HealthStatus::Critical,
            blocking: HealthStatus::Critical,
            overall: HealthStatus::Critical,
            summary: HealthStatus::Critical.summary().to_string(),
            evaluated_at: snapshot.collected_at,
        };
    }

    // A fact that could not be read is reported as Warning; one that is
    // switched off has nothing to report.
    let cpu = match (&snapshot.cpu.error, snapshot.cpu.skipped) {
        (Some(_), _) => HealthStatus::Warning,
        (None, true) => HealthStatus::Healthy,
        (None, false) => cpu_status(snapshot.cpu.utilization_percent, t),
    };
    let memory = match (&snapshot.memory.error, snapshot.memory.skipped) {
        (Some(_), _) => HealthStatus::Warning,
        (None, true) => HealthStatus::Healthy,
        (None, false) => memory_status(snapshot.memory.page_life_expectancy_seconds, t),
    };
    let disk_io = match (&snapshot.disk.error, snapshot.disk.skipped) {
        (Some(_), _) => HealthStatus::Warning,
        (None, true) => HealthStatus::Healthy,
        (None, false) => disk_status(snapshot.disk.max_latency_ms(), t),
    };
    let blocking = blocking_status(issues);

    let overall = [HealthStatus::Healthy, cpu, memory, disk_io, blocking]
        .into_iter()
        .max()
        .unwrap_or_default();

    HealthAssessment {
        connectivity: HealthStatus::Healthy,
        cpu,
        memory,
        disk_io,
        blocking,
        overall,
        summary: overall.summary().to_string(),
        evaluated_at: snapshot.collected_at,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use common::models::{FileIoStat, IssueType};

    use super::*;

    fn snapshot(cpu: f64, ple: i64, latency: f64) -> MetricSnapshot {
        let mut s = MetricSnapshot::new("db01", Utc::now());
        s.cpu.utilization_percent = cpu;
        s.memory.page_life_expectancy_seconds = ple;
        s.disk.files.push(FileIoStat {
            database_name: "Sales".into(),
            read_latency_ms: latency,
            ..Default::default()
        });
        s
    }

    #[test]
    fn test_cpu_boundaries_are_strict() {
        let t = HealthThresholds::default();
        assert_eq!(cpu_status(60.0, &t), HealthStatus::Healthy);
        assert_eq!(cpu_status(60.01, &t), HealthStatus::Warning);
        assert_eq!(cpu_status(80.0, &t), HealthStatus::Warning);
        assert_eq!(cpu_status(80.01, &t), HealthStatus::Critical);
    }

    #[test]
    fn test_memory_boundaries_are_strict() {
        let t = HealthThresholds::default();
        assert_eq!(memory_status(600, &t), HealthStatus::Healthy);
        assert_eq!(memory_status(599, &t), HealthStatus::Warning);
        assert_eq!(memory_status(300, &t), HealthStatus::Warning);
        assert_eq!(memory_status(299, &t), HealthStatus::Critical);
    }

    #[test]
    fn test_disk_boundaries_are_strict() {
        let t = HealthThresholds::default();
        assert_eq!(disk_status(20.0, &t), HealthStatus::Healthy);
        assert_eq!(disk_status(20.5, &t), HealthStatus::Warning);
        assert_eq!(disk_status(50.0, &t), HealthStatus::Warning);
        assert_eq!(disk_status(50.5, &t), HealthStatus::Critical);
    }

    #[test]
    fn test_overall_is_worst_dimension() {
        let t = HealthThresholds::default();
        let healthy = evaluate(&snapshot(10.0, 3600, 5.0), &[], &t);
        assert_eq!(healthy.overall, HealthStatus::Healthy);
        assert_eq!(healthy.summary, HealthStatus::Healthy.summary());

        let warn = evaluate(&snapshot(10.0, 450, 5.0), &[], &t);
        assert_eq!(warn.memory, HealthStatus::Warning);
        assert_eq!(warn.overall, HealthStatus::Warning);

        let crit = evaluate(&snapshot(10.0, 3600, 75.0), &[], &t);
        assert_eq!(crit.disk_io, HealthStatus::Critical);
        assert_eq!(crit.overall, HealthStatus::Critical);
        assert_eq!(crit.overall, crit.dimensions().into_iter().max().unwrap());
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let t = HealthThresholds::default();
        let s = snapshot(65.0, 500, 25.0);
        assert_eq!(evaluate(&s, &[], &t), evaluate(&s, &[], &t));
    }

    #[test]
    fn test_disconnected_snapshot_is_critical_everywhere() {
        let s = MetricSnapshot::disconnected("db01", Utc::now(), "login failed");
        let a = evaluate(&s, &[], &HealthThresholds::default());
        assert!(a.dimensions().iter().all(|d| *d == HealthStatus::Critical));
        assert_eq!(a.overall, HealthStatus::Critical);
    }

    #[test]
    fn test_failed_fact_is_warning() {
        let mut s = snapshot(10.0, 3600, 5.0);
        s.memory.error = Some("permission denied".into());
        let a = evaluate(&s, &[], &HealthThresholds::default());
        assert_eq!(a.memory, HealthStatus::Warning);
        assert_eq!(a.cpu, HealthStatus::Healthy);
    }

    #[test]
    fn test_skipped_facts_are_healthy() {
        // A skipped memory fact has PLE 0, far below the critical floor.
        let mut s = snapshot(10.0, 0, 0.0);
        s.memory.skipped = true;
        s.disk.skipped = true;
        let a = evaluate(&s, &[], &HealthThresholds::default());
        assert_eq!(a.memory, HealthStatus::Healthy);
        assert_eq!(a.disk_io, HealthStatus::Healthy);
        assert_eq!(a.overall, HealthStatus::Healthy);
    }

    #[test]
    fn test_blocking_dimension_follows_issues() {
        let t = HealthThresholds::default();
        let s = snapshot(10.0, 3600, 5.0);
        let medium = Issue::new("db01", IssueType::Blocking, IssueSeverity::Medium, "b", Utc::now());
        let high = Issue::new("db01", IssueType::Blocking, IssueSeverity::High, "b", Utc::now());
        let cpu = Issue::new("db01", IssueType::HighCpu, IssueSeverity::Critical, "c", Utc::now());

        assert_eq!(evaluate(&s, &[cpu.clone()], &t).blocking, HealthStatus::Healthy);
        assert_eq!(evaluate(&s, &[medium], &t).blocking, HealthStatus::Warning);
        assert_eq!(evaluate(&s, &[cpu, high], &t).blocking, HealthStatus::Critical);
    }
}
