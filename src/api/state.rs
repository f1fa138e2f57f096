use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::PublicConfig;
use crate::control::{ClusterControl, WatchMode};
use crate::coordination::{AgentLifecycle, ControlHandle};
use crate::services::Metrics;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Owner of the instance state
    pub lifecycle: Arc<AgentLifecycle>,

    /// Local command queue
    pub control: ControlHandle,

    /// Cluster-wide control writes
    pub cluster: ClusterControl,

    /// Current cluster watch mode
    pub watch_mode: watch::Receiver<Option<WatchMode>>,

    pub metrics: Arc<Metrics>,

    /// Non-sensitive configuration
    pub config: Arc<PublicConfig>,
}

impl AppState {
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.lifecycle.started_at()).num_seconds()
    }

    pub fn watch_mode(&self) -> Option<WatchMode> {
        *self.watch_mode.borrow()
    }
}
