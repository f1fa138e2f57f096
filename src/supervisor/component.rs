//! Supervised components with automatic restart
//!
//! A component that fails is restarted with exponential backoff up to
//! `max_restarts` times. A normal exit or a shutdown ends supervision.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::coordination::{ExponentialBackoff, ShutdownToken};
use crate::error::{DroverError, Result};

/// Configuration for supervised restarts
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Restarts allowed before giving up (default: 10)
    pub max_restarts: u32,
    /// Delay before the first restart (default: 1s)
    pub initial_backoff: Duration,
    /// Cap on the restart delay (default: 60s)
    pub max_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Starting,
    Running,
    Crashed,
    Restarting,
    Stopped,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentState::Starting => write!(f, "starting"),
            ComponentState::Running => write!(f, "running"),
            ComponentState::Crashed => write!(f, "crashed"),
            ComponentState::Restarting => write!(f, "restarting"),
            ComponentState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStats {
    pub name: String,
    pub state: ComponentState,
    pub restart_count: u32,
    pub crash_count: u32,
    pub last_crash: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ComponentStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ComponentState::Stopped,
            restart_count: 0,
            crash_count: 0,
            last_crash: None,
            last_error: None,
            started_at: None,
        }
    }
}

pub struct SupervisedComponent {
    name: String,
    config: SupervisorConfig,
    stats: Arc<RwLock<ComponentStats>>,
}

impl SupervisedComponent {
    pub fn new(name: impl Into<String>, config: SupervisorConfig) -> Self {
        let name = name.into();
        let stats = Arc::new(RwLock::new(ComponentStats::new(&name)));
        Self {
            name,
            config,
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn stats(&self) -> ComponentStats {
        self.stats.read().await.clone()
    }

    async fn set_state(&self, state: ComponentState) {
        self.stats.write().await.state = state;
    }

    /// Run `factory()` until it exits normally, the token fires, or restarts run out
    pub async fn run<F, Fut>(&self, mut factory: F, mut token: ShutdownToken) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut backoff =
            ExponentialBackoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            if token.is_cancelled() {
                break;
            }

            {
                let mut stats = self.stats.write().await;
                info!("[{}] Starting (attempt {})", self.name, stats.restart_count + 1);
                stats.state = ComponentState::Running;
                stats.started_at = Some(Utc::now());
            }

            let result = tokio::select! {
                _ = token.cancelled() => {
                    info!("[{}] Cancelled, shutting down", self.name);
                    break;
                }
                result = factory() => result,
            };

            let err = match result {
                Ok(()) => {
                    info!("[{}] Exited normally", self.name);
                    break;
                }
                Err(e) => e,
            };

            let restart_count = {
                let mut stats = self.stats.write().await;
                stats.crash_count += 1;
                stats.last_crash = Some(Utc::now());
                stats.last_error = Some(err.to_string());
                stats.state = ComponentState::Crashed;
                error!("[{}] Crashed (crash #{}): {}", self.name, stats.crash_count, err);
                stats.restart_count
            };

            if restart_count >= self.config.max_restarts {
                error!(
                    "[{}] Maximum restart attempts ({}) reached",
                    self.name, self.config.max_restarts
                );
                self.set_state(ComponentState::Stopped).await;
                return Err(DroverError::ComponentFailure {
                    component: self.name.clone(),
                    reason: format!(
                        "exceeded {} restarts, last error: {}",
                        self.config.max_restarts, err
                    ),
                });
            }

            let delay = backoff.next_delay();
            warn!(
                "[{}] Restarting in {:?} (restart {}/{})",
                self.name,
                delay,
                restart_count + 1,
                self.config.max_restarts
            );
            self.set_state(ComponentState::Restarting).await;

            tokio::select! {
                _ = token.cancelled() => {
                    info!("[{}] Shutdown requested during restart backoff", self.name);
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            self.stats.write().await.restart_count += 1;
        }

        self.set_state(ComponentState::Stopped).await;
        Ok(())
    }
}

/// Owns a set of supervised components
#[derive(Default)]
pub struct Supervisor {
    components: Vec<Arc<SupervisedComponent>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a supervised component
    pub fn spawn<F, Fut>(
        &mut self,
        name: &str,
        config: SupervisorConfig,
        factory: F,
        token: ShutdownToken,
    ) -> JoinHandle<Result<()>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let component = Arc::new(SupervisedComponent::new(name, config));
        self.components.push(Arc::clone(&component));
        tokio::spawn(async move { component.run(factory, token).await })
    }

    pub async fn stats(&self) -> Vec<ComponentStats> {
        join_all(self.components.iter().map(|component| component.stats())).await
    }
}
