//! Graceful Shutdown Handler
//!
//! Once the instance enters STOPPING the execution loop gets a bounded grace
//! period to finish its current batch. Only after it exits are the background
//! tasks (watcher, heartbeat, file poller, API) cancelled.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::DroverError;

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time the execution loop has to finish its in-flight batch (default: 30s)
    pub grace_timeout: Duration,
    /// Time each background task has to exit after cancellation (default: 5s)
    pub background_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_timeout: Duration::from_secs(30),
            background_timeout: Duration::from_secs(5),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Waiting for the execution loop to finish its batch
    Draining,
    /// Cancelling watcher, heartbeat, file poller and API
    CancellingBackground,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::Draining => write!(f, "draining"),
            ShutdownPhase::CancellingBackground => write!(f, "cancelling_background"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone, Error)]
pub enum ShutdownError {
    #[error("execution loop did not finish within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("component {0} failed during shutdown")]
    ComponentFailed(String),
}

impl From<ShutdownError> for DroverError {
    fn from(err: ShutdownError) -> Self {
        match err {
            ShutdownError::Timeout { timeout_secs } => {
                DroverError::ShutdownTimeout { timeout_secs }
            }
            ShutdownError::ComponentFailed(component) => DroverError::ComponentFailure {
                component,
                reason: "panicked during shutdown".to_string(),
            },
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    cancel_tx: watch::Sender<bool>,
    phase_tx: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            cancel_tx,
            phase_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Token handed to every background task
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.cancel_tx.subscribe(),
        }
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_tx.subscribe()
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase_tx.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Wait for the execution loop to exit, bounded by the grace timeout.
    ///
    /// The handle is left untouched on timeout so the caller decides whether to
    /// abort it.
    pub async fn drain<T>(&self, handle: &mut JoinHandle<T>) -> Result<T, ShutdownError> {
        self.set_phase(ShutdownPhase::Draining);
        let grace = self.config.grace_timeout;

        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(value)) => {
                debug!("Execution loop drained");
                Ok(value)
            }
            Ok(Err(e)) => {
                error!("Execution loop terminated abnormally: {}", e);
                Err(ShutdownError::ComponentFailed("execution loop".to_string()))
            }
            Err(_) => {
                error!("Execution loop did not finish within {:?}", grace);
                Err(ShutdownError::Timeout {
                    timeout_secs: grace.as_secs(),
                })
            }
        }
    }

    /// Signal every token holder to stop
    pub fn cancel_background(&self) {
        self.set_phase(ShutdownPhase::CancellingBackground);
        self.cancel_tx.send_replace(true);
    }

    /// Wait for cancelled tasks to exit; stragglers are aborted
    pub async fn join_background(&self, handles: Vec<(&'static str, JoinHandle<()>)>) {
        for (name, mut handle) in handles {
            match tokio::time::timeout(self.config.background_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("{} stopped", name),
                Ok(Err(e)) if e.is_cancelled() => debug!("{} aborted", name),
                Ok(Err(e)) => warn!("{} terminated abnormally: {}", name, e),
                Err(_) => {
                    warn!(
                        "{} did not stop within {:?}, aborting",
                        name, self.config.background_timeout
                    );
                    handle.abort();
                }
            }
        }
    }

    pub fn complete(&self) {
        self.set_phase(ShutdownPhase::Complete);
    }
}

/// Cancellation token for background tasks
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested (or the coordinator is dropped)
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(ShutdownPhase::Draining.to_string(), "draining");
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }

    #[tokio::test]
    async fn test_token_observes_cancellation() {
        let shutdown = GracefulShutdown::with_defaults();
        let mut token = shutdown.token();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
            true
        });
        shutdown.cancel_background();
        assert!(waiter.await.unwrap());
        assert!(shutdown.is_cancelled());
        assert_eq!(shutdown.current_phase(), ShutdownPhase::CancellingBackground);
    }

    #[tokio::test]
    async fn test_token_created_after_cancel_is_cancelled() {
        let shutdown = GracefulShutdown::with_defaults();
        shutdown.cancel_background();
        let mut token = shutdown.token();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn test_drain_within_grace() {
        let shutdown = GracefulShutdown::with_defaults();
        let mut handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            7
        });
        assert_eq!(shutdown.drain(&mut handle).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_drain_timeout() {
        let shutdown = GracefulShutdown::new(ShutdownConfig {
            grace_timeout: Duration::from_millis(20),
            background_timeout: Duration::from_millis(20),
        });
        let mut handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let err = shutdown.drain(&mut handle).await.unwrap_err();
        assert!(matches!(err, ShutdownError::Timeout { .. }));
        handle.abort();

        let converted: DroverError = err.into();
        assert!(matches!(converted, DroverError::ShutdownTimeout { .. }));
    }

    #[tokio::test]
    async fn test_join_background_aborts_stragglers() {
        let shutdown = GracefulShutdown::new(ShutdownConfig {
            grace_timeout: Duration::from_millis(20),
            background_timeout: Duration::from_millis(20),
        });
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let quick = tokio::spawn(async {});

        shutdown
            .join_background(vec![("stuck", stuck), ("quick", quick)])
            .await;
        shutdown.complete();
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }
}
