use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational state of a single worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Pulling and processing batches
    Running,
    /// Idle until resumed; in-flight work was allowed to finish
    Paused,
    /// Draining the current batch before exit
    Stopping,
    /// Execution loop has exited
    Stopped,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Running => "RUNNING",
            AgentState::Paused => "PAUSED",
            AgentState::Stopping => "STOPPING",
            AgentState::Stopped => "STOPPED",
        }
    }

    /// Readiness is derived solely from the state
    pub fn is_ready(&self) -> bool {
        matches!(self, AgentState::Running)
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, AgentState::Stopping | AgentState::Stopped)
    }

    /// Apply the transition guard table.
    ///
    /// Returns the resulting state, or `None` when the request is not valid
    /// from the current state.
    pub fn next(&self, request: TransitionRequest) -> Option<AgentState> {
        use AgentState::*;

        match (self, request) {
            (Running, TransitionRequest::Pause) => Some(Paused),
            (Paused, TransitionRequest::Resume) => Some(Running),
            (Running | Paused, TransitionRequest::Shutdown) => Some(Stopping),
            _ => None,
        }
    }

    /// Requests accepted from this state
    pub fn valid_requests(&self) -> Vec<TransitionRequest> {
        use AgentState::*;

        match self {
            Running => vec![TransitionRequest::Pause, TransitionRequest::Shutdown],
            Paused => vec![TransitionRequest::Resume, TransitionRequest::Shutdown],
            Stopping | Stopped => vec![],
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AgentState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_uppercase().as_str() {
            "RUNNING" => Ok(AgentState::Running),
            "PAUSED" => Ok(AgentState::Paused),
            "STOPPING" => Ok(AgentState::Stopping),
            "STOPPED" => Ok(AgentState::Stopped),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// A request to move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionRequest {
    Pause,
    Resume,
    Shutdown,
}

impl TransitionRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionRequest::Pause => "pause",
            TransitionRequest::Resume => "resume",
            TransitionRequest::Shutdown => "shutdown",
        }
    }

    /// State the request aims for when accepted
    pub fn target(&self) -> AgentState {
        match self {
            TransitionRequest::Pause => AgentState::Paused,
            TransitionRequest::Resume => AgentState::Running,
            TransitionRequest::Shutdown => AgentState::Stopping,
        }
    }
}

impl fmt::Display for TransitionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Running counters reported by the heartbeat and stats endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub batches_processed: u64,
    pub documents_processed: u64,
    pub errors_count: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// State transition record (for logging/observers)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: AgentState, to: AgentState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}
