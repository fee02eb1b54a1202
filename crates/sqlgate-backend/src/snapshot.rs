//! Structured server snapshot for reporting.

use std::collections::BTreeMap;

use serde::Serialize;

/// Everything a report or the admin API shows about one server.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServerSnapshot {
    pub id: String,
    pub parameters: BTreeMap<String, String>,
    pub state: String,
    pub version_string: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_lag: Option<i64>,
    /// Unix timestamp of the last heartbeat seen by the monitor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<i64>,
    pub statistics: ServerStatistics,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerStatistics {
    pub connections: usize,
    pub total_connections: u64,
    pub persistent_connections: usize,
    pub max_persistent_connections: usize,
    pub reused_connections: u64,
    pub active_operations: usize,
    pub routed_packets: u64,
    pub adaptive_avg_select_time: String,
}

impl ServerSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
