use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::control::WatchMode;
use crate::domain::{AgentState, ControlRecord};

// ============================================================================
// Health Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub state: AgentState,
}

// ============================================================================
// Agent Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateResponse {
    pub state: AgentState,
    pub timestamp: DateTime<Utc>,
    pub last_applied_cluster_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    pub state: AgentState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub instance_id: String,
    pub state: AgentState,
    pub batches_processed: u64,
    pub documents_processed: u64,
    pub errors_count: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_applied_cluster_version: i64,
    pub uptime_seconds: i64,
}

// ============================================================================
// Cluster Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterCommandRequest {
    pub reason: Option<String>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCommandResponse {
    pub message: String,
    pub record: ControlRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStateResponse {
    pub record: ControlRecord,
    pub watch_mode: Option<WatchMode>,
    pub last_applied_cluster_version: i64,
    pub local_state: AgentState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatusResponse {
    pub connected: bool,
    pub record_version: Option<i64>,
    pub error: Option<String>,
}
