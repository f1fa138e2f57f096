//! Heartbeat / Health Emitter
//!
//! File-based probes for process supervisors: a liveness artifact refreshed on
//! every tick and a readiness artifact that exists iff the instance is RUNNING.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::coordination::{AgentLifecycle, AgentSnapshot, ShutdownToken};
use crate::domain::AgentState;
use crate::error::Result;

/// Content of the liveness artifact
#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport<'a> {
    pub instance_id: &'a str,
    pub pid: u32,
    #[serde(flatten)]
    pub snapshot: &'a AgentSnapshot,
}

/// Locations of the liveness and readiness artifacts
#[derive(Debug, Clone)]
pub struct HealthFiles {
    dir: PathBuf,
}

impl HealthFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn liveness_path(&self) -> PathBuf {
        self.dir.join("liveness")
    }

    pub fn readiness_path(&self) -> PathBuf {
        self.dir.join("readiness")
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub async fn write_liveness(&self, report: &LivenessReport<'_>) -> Result<()> {
        let body = serde_json::to_vec_pretty(report)?;
        write_atomic(&self.liveness_path(), &body).await
    }

    /// Create or remove the readiness artifact to match `state`
    pub async fn sync_readiness(&self, state: AgentState) -> Result<()> {
        let path = self.readiness_path();
        if state.is_ready() {
            let stamp = chrono::Utc::now().to_rfc3339();
            write_atomic(&path, stamp.as_bytes()).await
        } else {
            remove_if_exists(&path).await
        }
    }

    /// Remove both artifacts
    pub async fn clear(&self) -> Result<()> {
        remove_if_exists(&self.readiness_path()).await?;
        remove_if_exists(&self.liveness_path()).await?;
        debug!("Health artifacts removed from {}", self.dir.display());
        Ok(())
    }
}

async fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub struct HeartbeatEmitter {
    lifecycle: Arc<AgentLifecycle>,
    files: HealthFiles,
    interval: Duration,
    instance_id: String,
}

impl HeartbeatEmitter {
    pub fn new(
        lifecycle: Arc<AgentLifecycle>,
        files: HealthFiles,
        interval: Duration,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            lifecycle,
            files,
            interval,
            instance_id: instance_id.into(),
        }
    }

    /// Stamp `last_heartbeat` and refresh both artifacts
    pub async fn beat(&self) -> Result<()> {
        let snapshot = self.lifecycle.touch_heartbeat().await;
        let report = LivenessReport {
            instance_id: &self.instance_id,
            pid: std::process::id(),
            snapshot: &snapshot,
        };
        self.files.write_liveness(&report).await?;
        self.files.sync_readiness(snapshot.state).await
    }

    pub async fn run(self, mut token: ShutdownToken) {
        if let Err(e) = self.files.ensure_dir().await {
            warn!("Cannot create health directory: {}", e);
        }

        let mut state_rx: watch::Receiver<AgentState> = self.lifecycle.subscribe_state();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Heartbeat emitter started (every {:?}, dir {})",
            self.interval,
            self.files.dir.display()
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!("Heartbeat update failed: {}", e);
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // Readiness follows transitions, not only the tick
                    let state = *state_rx.borrow_and_update();
                    if let Err(e) = self.files.sync_readiness(state).await {
                        warn!("Readiness update failed: {}", e);
                    }
                }
            }
        }

        debug!("Heartbeat emitter stopped");
    }
}
