//! Real-time push events.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::health::HealthAssessment;
use crate::models::issue::Issue;
use crate::models::monitor::MetricSnapshot;

/// Everything produced by one monitoring tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTick {
    pub server_name: String,
    pub snapshot: MetricSnapshot,
    pub health: HealthAssessment,
    /// Issues detected on this tick.
    pub issues: Vec<Issue>,
}

/// Message delivered to subscribers of a server group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", content = "data")]
pub enum MonitorEvent {
    /// A tick completed.
    MetricsUpdated(MonitorTick),
    /// The loop for the group stopped.
    #[serde(rename_all = "camelCase")]
    MonitoringStopped { server_name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_event_shape() {
        let json = serde_json::to_value(MonitorEvent::MonitoringStopped {
            server_name: "db01".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "MonitoringStopped");
        assert_eq!(json["data"]["serverName"], "db01");
    }
}
