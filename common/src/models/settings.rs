//! Monitoring settings.
//!
//! A single settings document persisted as JSON. Missing fields take their
//! documented defaults, so older documents keep loading.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::{AppError, AppResult};
use crate::models::issue::IssueSeverity;

/// Where alerts are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannelKind {
    /// HTTP POST of a JSON payload.
    Webhook,
    /// Structured warning in the service log.
    Log,
}

/// One alert delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertChannel {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    pub kind: AlertChannelKind,
    /// Target URL, required for webhooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "Webhook URL is invalid"))]
    pub url: Option<String>,
    /// Alerts below this severity are not sent to the channel.
    pub min_severity: IssueSeverity,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Monitoring settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringSettings {
    /// Seconds between ticks.
    #[validate(range(min = 5, max = 86400, message = "Interval must be 5-86400 seconds"))]
    pub sampling_interval_seconds: u64,
    /// Minutes of tick history kept in memory per server.
    #[validate(range(min = 1, max = 10080))]
    pub history_retention_minutes: u64,
    /// Days a resolved issue is kept before it may be purged.
    #[validate(range(min = 1, max = 3650))]
    pub retention_days: u32,

    pub collect_cpu: bool,
    pub collect_memory: bool,
    pub collect_disk_io: bool,
    pub collect_wait_stats: bool,
    /// Query Store top-query collection (optional feature on the server).
    pub collect_query_store: bool,

    /// CPU percent above which an alert is raised.
    #[validate(range(min = 0.0, max = 100.0))]
    pub cpu_threshold: f64,
    /// Page life expectancy (seconds) below which an alert is raised.
    #[validate(range(min = 0))]
    pub page_life_expectancy_threshold: i64,
    /// Requests running longer than this are reported as long-running.
    #[validate(range(min = 1))]
    pub long_running_query_seconds: u64,

    #[validate(nested)]
    pub alert_channels: Vec<AlertChannel>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            sampling_interval_seconds: 300,
            history_retention_minutes: 60,
            retention_days: 30,
            collect_cpu: true,
            collect_memory: true,
            collect_disk_io: true,
            collect_wait_stats: true,
            collect_query_store: true,
            cpu_threshold: 85.0,
            page_life_expectancy_threshold: 300,
            long_running_query_seconds: 30,
            alert_channels: Vec::new(),
        }
    }
}

impl MonitoringSettings {
    /// Runs field validation plus the cross-field rules.
    ///
    /// # Errors
    /// Returns `AppError::Validation` describing the first failing rule set.
    pub fn check(&self) -> AppResult<()> {
        self.validate()?;
        if let Some(channel) = self
            .alert_channels
            .iter()
            .find(|c| c.kind == AlertChannelKind::Webhook && c.url.is_none())
        {
            return Err(AppError::Validation(format!(
                "alert channel '{}' is a webhook without a url",
                channel.name
            )));
        }
        Ok(())
    }

    /// Number of ticks retained per server: the retention window divided by
    /// the sampling interval, never less than one.
    pub fn history_capacity(&self) -> usize {
        let window = self.history_retention_minutes.saturating_mul(60);
        (window / self.sampling_interval_seconds.max(1)).max(1) as usize
    }
}

fn default_true() -> bool {
    true
}
