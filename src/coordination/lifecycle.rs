//! Agent Lifecycle State Machine
//!
//! Sole owner of the instance's `AgentState`, the cluster version bookkeeping
//! and the statistics counters. Every transition is published on a watch
//! channel so readiness and the execution loop react immediately.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

use crate::domain::{
    AgentState, AgentStats, CommandEvent, CommandSource, StateTransition, TransitionRequest,
};
use crate::error::{DroverError, Result};

/// Lifecycle events broadcast to listeners
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// State changed in response to a command
    StateChanged {
        from: AgentState,
        to: AgentState,
        source: CommandSource,
        version: Option<i64>,
    },
    /// A cluster command was recorded but not acted on
    ClusterCommandDiscarded { version: i64, reason: String },
    /// The execution loop exited and the instance reached STOPPED
    Stopped,
}

/// What happened to a command event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// Transition performed
    Applied { from: AgentState, to: AgentState },
    /// Shutdown requested while already stopping or stopped
    Unchanged { state: AgentState },
    /// Cluster version at or below the last applied one
    Stale { version: i64, last_applied: i64 },
    /// Cluster command not valid from the current state; version still recorded
    Discarded {
        version: i64,
        state: AgentState,
        request: TransitionRequest,
    },
}

impl EventOutcome {
    pub fn state_changed(&self) -> bool {
        matches!(self, EventOutcome::Applied { .. })
    }
}

/// Consistent view of the instance for heartbeats and the stats endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub state: AgentState,
    pub last_applied_cluster_version: i64,
    pub stats: AgentStats,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct LifecycleInner {
    state: AgentState,
    last_applied_cluster_version: i64,
    stats: AgentStats,
    last_transition: Option<StateTransition>,
}

/// Serialized owner of the per-instance state
pub struct AgentLifecycle {
    inner: RwLock<LifecycleInner>,
    state_tx: watch::Sender<AgentState>,
    event_tx: broadcast::Sender<LifecycleEvent>,
    started_at: DateTime<Utc>,
}

impl AgentLifecycle {
    /// Instances start in RUNNING; the startup sync may move them right away
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(AgentState::Running);
        let (event_tx, _) = broadcast::channel(64);
        Self {
            inner: RwLock::new(LifecycleInner {
                state: AgentState::Running,
                last_applied_cluster_version: -1,
                stats: AgentStats::default(),
                last_transition: None,
            }),
            state_tx,
            event_tx,
            started_at: Utc::now(),
        }
    }

    /// Watch channel carrying every state change
    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    /// Current state without taking the lock
    pub fn current(&self) -> AgentState {
        *self.state_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ready()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn last_applied_cluster_version(&self) -> i64 {
        self.inner.read().await.last_applied_cluster_version
    }

    pub async fn stats(&self) -> AgentStats {
        self.inner.read().await.stats.clone()
    }

    pub async fn last_transition(&self) -> Option<StateTransition> {
        self.inner.read().await.last_transition.clone()
    }

    pub async fn snapshot(&self) -> AgentSnapshot {
        let inner = self.inner.read().await;
        AgentSnapshot {
            state: inner.state,
            last_applied_cluster_version: inner.last_applied_cluster_version,
            stats: inner.stats.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Apply a command event.
    ///
    /// Cluster events are advisory: stale versions and invalid transitions are
    /// discarded, and the version is recorded either way. Local events surface
    /// an invalid transition as an error.
    pub async fn apply(&self, event: &CommandEvent) -> Result<EventOutcome> {
        let mut inner = self.inner.write().await;
        let request = event.command.transition();

        match event.source {
            CommandSource::Cluster => {
                let version = event.version.ok_or_else(|| {
                    DroverError::Validation("cluster command without a version".to_string())
                })?;

                if version <= inner.last_applied_cluster_version {
                    debug!(
                        "Ignoring stale cluster command {} (v{} <= v{})",
                        event.command, version, inner.last_applied_cluster_version
                    );
                    return Ok(EventOutcome::Stale {
                        version,
                        last_applied: inner.last_applied_cluster_version,
                    });
                }

                let outcome = match self.transition_locked(&mut inner, request, event) {
                    Ok(outcome) => outcome,
                    Err(state) => {
                        let reason = format!("{} not valid from {}", request, state);
                        info!("Cluster command v{} discarded: {}", version, reason);
                        let _ = self
                            .event_tx
                            .send(LifecycleEvent::ClusterCommandDiscarded { version, reason });
                        EventOutcome::Discarded {
                            version,
                            state,
                            request,
                        }
                    }
                };
                inner.last_applied_cluster_version = version;
                Ok(outcome)
            }
            CommandSource::Local => {
                self.transition_locked(&mut inner, request, event)
                    .map_err(|state| {
                        warn!("Cannot {} from state: {}", request, state);
                        DroverError::InvalidStateTransition {
                            from: state.to_string(),
                            to: request.target().to_string(),
                        }
                    })
            }
        }
    }

    /// Internal transition once the execution loop has exited
    pub async fn mark_stopped(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.state {
            AgentState::Stopping => {
                inner.last_transition = Some(StateTransition::new(
                    AgentState::Stopping,
                    AgentState::Stopped,
                    "execution loop exited",
                ));
                inner.state = AgentState::Stopped;
                self.state_tx.send_replace(AgentState::Stopped);
                let _ = self.event_tx.send(LifecycleEvent::Stopped);
                info!("Agent state: STOPPING -> STOPPED");
                Ok(())
            }
            AgentState::Stopped => Ok(()),
            other => Err(DroverError::InvalidStateTransition {
                from: other.to_string(),
                to: AgentState::Stopped.to_string(),
            }),
        }
    }

    /// Record a finished batch
    pub async fn record_batch(&self, documents: u64, failures: u64) {
        let mut inner = self.inner.write().await;
        inner.stats.batches_processed += 1;
        inner.stats.documents_processed += documents;
        inner.stats.errors_count += failures;
    }

    /// Record a batch that failed as a whole
    pub async fn record_error(&self) {
        self.inner.write().await.stats.errors_count += 1;
    }

    /// Stamp the heartbeat time and return the snapshot to publish
    pub async fn touch_heartbeat(&self) -> AgentSnapshot {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        inner.stats.last_heartbeat = Some(now);
        AgentSnapshot {
            state: inner.state,
            last_applied_cluster_version: inner.last_applied_cluster_version,
            stats: inner.stats.clone(),
            timestamp: now,
        }
    }

    /// Attempt a transition while holding the lock.
    ///
    /// Shutdown bypasses the guard table once already stopping. Returns the
    /// current state on rejection.
    fn transition_locked(
        &self,
        inner: &mut LifecycleInner,
        request: TransitionRequest,
        event: &CommandEvent,
    ) -> std::result::Result<EventOutcome, AgentState> {
        let from = inner.state;

        if request == TransitionRequest::Shutdown && from.is_shutting_down() {
            debug!("Already shutting down (state: {})", from);
            return Ok(EventOutcome::Unchanged { state: from });
        }

        let to = from.next(request).ok_or(from)?;
        inner.state = to;
        inner.last_transition = Some(StateTransition::new(
            from,
            to,
            format!("{} {}", event.source, event.command),
        ));
        self.state_tx.send_replace(to);

        let _ = self.event_tx.send(LifecycleEvent::StateChanged {
            from,
            to,
            source: event.source,
            version: event.version,
        });

        info!(
            "Agent state: {} -> {} ({} {}{})",
            from,
            to,
            event.source,
            event.command,
            event.version.map(|v| format!(" v{}", v)).unwrap_or_default()
        );

        Ok(EventOutcome::Applied { from, to })
    }
}

impl Default for AgentLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
