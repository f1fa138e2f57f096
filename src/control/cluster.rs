//! Cluster-wide control writes
//!
//! Operator commands are recorded on the shared control record with a
//! compare-and-swap on `version`. Losing writers re-read and retry.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{CasOutcome, ControlStore};
use crate::domain::{ControlCommand, ControlRecord};
use crate::error::{DroverError, Result};

#[derive(Clone)]
pub struct ClusterControl {
    store: Arc<dyn ControlStore>,
    max_attempts: u32,
}

impl ClusterControl {
    pub fn new(store: Arc<dyn ControlStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Current record as stored
    pub async fn cluster_state(&self) -> Result<ControlRecord> {
        self.store.load().await
    }

    /// Write `command` as the next version of the control record
    #[instrument(skip(self, reason, updated_by))]
    pub async fn set_command(
        &self,
        command: ControlCommand,
        reason: Option<String>,
        updated_by: Option<String>,
    ) -> Result<ControlRecord> {
        for attempt in 1..=self.max_attempts {
            let current = self.store.load().await?;
            let next = current.successor(command, reason.clone(), updated_by.clone());

            match self.store.compare_and_swap(current.version, &next).await? {
                CasOutcome::Written(record) => {
                    info!(
                        "Cluster command set to {} (v{} -> v{})",
                        command, current.version, record.version
                    );
                    return Ok(record);
                }
                CasOutcome::Conflict => {
                    debug!(
                        "Control record moved past v{} (attempt {}/{})",
                        current.version, attempt, self.max_attempts
                    );
                }
            }
        }

        warn!(
            "Giving up on cluster command {} after {} attempts",
            command, self.max_attempts
        );
        Err(DroverError::ConcurrentModification {
            attempts: self.max_attempts,
        })
    }

    pub async fn pause_all(
        &self,
        reason: Option<String>,
        updated_by: Option<String>,
    ) -> Result<ControlRecord> {
        self.set_command(ControlCommand::Pause, reason, updated_by).await
    }

    pub async fn resume_all(
        &self,
        reason: Option<String>,
        updated_by: Option<String>,
    ) -> Result<ControlRecord> {
        self.set_command(ControlCommand::Running, reason, updated_by).await
    }

    pub async fn shutdown_all(
        &self,
        reason: Option<String>,
        updated_by: Option<String>,
    ) -> Result<ControlRecord> {
        self.set_command(ControlCommand::Shutdown, reason, updated_by).await
    }
}
