//! Monitoring and performance metrics models.
//!
//! A `MetricSnapshot` is the merged output of one collection pass. Every fact
//! is always present: a fact whose collector failed keeps its zero value and
//! records the failure in its `error` field, and a fact switched off in the
//! settings keeps its zero value and sets `skipped`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reachability of the monitored server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityFact {
    /// Whether the probe query succeeded.
    pub is_connected: bool,
    /// `@@SERVERNAME` reported by the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Engine product version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,
    /// Probe failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A resource-consuming query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopQuery {
    /// Query text (truncated).
    pub query_text: String,
    /// Database the query ran in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    pub execution_count: i64,
    pub total_cpu_ms: f64,
    pub avg_cpu_ms: f64,
    pub avg_duration_ms: f64,
    pub total_logical_reads: i64,
    pub total_physical_reads: i64,
}

/// CPU utilization fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuFact {
    /// SQL Server process CPU utilization, 0-100.
    pub utilization_percent: f64,
    pub active_worker_threads: i64,
    pub active_requests: i64,
    /// Top CPU consumers from Query Store; empty when Query Store is off.
    pub top_cpu_queries: Vec<TopQuery>,
    /// Collector failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why `top_cpu_queries` is empty, if Query Store was unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_queries_warning: Option<String>,
    /// Collection is switched off in the monitoring settings.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl CpuFact {
    /// Collected without error and not switched off.
    pub fn is_available(&self) -> bool {
        self.error.is_none() && !self.skipped
    }
}

/// Memory fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFact {
    pub total_server_memory_mb: f64,
    pub target_server_memory_mb: f64,
    pub plan_cache_mb: f64,
    pub buffer_pool_mb: f64,
    pub page_life_expectancy_seconds: i64,
    /// Low-memory signal raised by the OS or memory committed at target.
    pub memory_pressure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Collection is switched off in the monitoring settings.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl MemoryFact {
    pub fn is_available(&self) -> bool {
        self.error.is_none() && !self.skipped
    }
}

/// I/O statistics for one database file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileIoStat {
    pub database_name: String,
    pub file_name: String,
    /// `ROWS` or `LOG`.
    pub file_type: String,
    pub read_latency_ms: f64,
    pub write_latency_ms: f64,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

/// Disk I/O fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskFact {
    pub files: Vec<FileIoStat>,
    pub top_io_queries: Vec<TopQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Collection is switched off in the monitoring settings.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl DiskFact {
    /// Highest read or write latency across all files.
    pub fn max_latency_ms(&self) -> f64 {
        self.files
            .iter()
            .map(|f| f.read_latency_ms.max(f.write_latency_ms))
            .fold(0.0, f64::max)
    }
}

/// Wait type family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum WaitCategory {
    #[serde(rename = "CPU")]
    Cpu,
    Memory,
    Disk,
    Network,
    Locking,
    #[default]
    Other,
}

/// One ranked wait type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaitStatistic {
    pub wait_type: String,
    pub wait_time_ms: i64,
    pub waiting_tasks_count: i64,
    /// Share of total (non-benign) wait time, 0-100.
    pub percentage: f64,
    pub category: WaitCategory,
    pub description: String,
}

/// Merged output of one collection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    /// Display name of the target.
    pub server_name: String,
    pub collected_at: DateTime<Utc>,
    pub connectivity: ConnectivityFact,
    pub cpu: CpuFact,
    pub memory: MemoryFact,
    pub disk: DiskFact,
    pub wait_statistics: Vec<WaitStatistic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_statistics_error: Option<String>,
}

impl MetricSnapshot {
    /// An empty snapshot for a reachable server; collectors fill it in.
    pub fn new(server_name: impl Into<String>, collected_at: DateTime<Utc>) -> Self {
        Self {
            server_name: server_name.into(),
            collected_at,
            connectivity: ConnectivityFact {
                is_connected: true,
                ..Default::default()
            },
            cpu: CpuFact::default(),
            memory: MemoryFact::default(),
            disk: DiskFact::default(),
            wait_statistics: Vec::new(),
            wait_statistics_error: None,
        }
    }

    /// A snapshot for a server that could not be reached. Every fact is
    /// zero-valued and flagged with the connectivity error.
    pub fn disconnected(
        server_name: impl Into<String>,
        collected_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            server_name: server_name.into(),
            collected_at,
            connectivity: ConnectivityFact {
                is_connected: false,
                error: Some(error.clone()),
                ..Default::default()
            },
            cpu: CpuFact {
                error: Some(error.clone()),
                ..Default::default()
            },
            memory: MemoryFact {
                error: Some(error.clone()),
                ..Default::default()
            },
            disk: DiskFact {
                error: Some(error.clone()),
                ..Default::default()
            },
            wait_statistics: Vec::new(),
            wait_statistics_error: Some(error),
        }
    }

    /// Whether the connectivity probe succeeded.
    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected
    }
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityCheck {
    pub is_connected: bool,
    pub server_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
