//! Shared data models for the monitoring service.

pub mod event;
pub mod health;
pub mod issue;
pub mod monitor;
pub mod settings;
pub mod target;

// Re-export commonly used types
pub use event::{MonitorEvent, MonitorTick};
pub use health::{HealthAssessment, HealthStatus, HealthThresholds};
pub use issue::{Issue, IssueSeverity, IssueType};
pub use monitor::{
    ConnectivityCheck, ConnectivityFact, CpuFact, DiskFact, FileIoStat, MemoryFact,
    MetricSnapshot, TopQuery, WaitCategory, WaitStatistic,
};
pub use settings::{AlertChannel, AlertChannelKind, MonitoringSettings};
pub use target::{server_key, Target};
