use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::ControlRecord;
use super::state::TransitionRequest;
use crate::error::DroverError;

/// Desired operational command, as stored in the control record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Running,
    Pause,
    Shutdown,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::Running => "running",
            ControlCommand::Pause => "pause",
            ControlCommand::Shutdown => "shutdown",
        }
    }

    /// Transition the state machine should attempt for this command
    pub fn transition(&self) -> TransitionRequest {
        match self {
            ControlCommand::Running => TransitionRequest::Resume,
            ControlCommand::Pause => TransitionRequest::Pause,
            ControlCommand::Shutdown => TransitionRequest::Shutdown,
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = DroverError;

    /// Accepts the stored spellings plus `resume` as an alias of `running`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "running" | "resume" => Ok(ControlCommand::Running),
            "pause" => Ok(ControlCommand::Pause),
            "shutdown" => Ok(ControlCommand::Shutdown),
            other => Err(DroverError::InvalidCommand(format!(
                "'{}' (expected running, pause or shutdown)",
                other
            ))),
        }
    }
}

/// Where a command originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSource {
    /// Observed on the shared control record
    Cluster,
    /// Signal, control file or direct call targeting this instance only
    Local,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSource::Cluster => write!(f, "cluster"),
            CommandSource::Local => write!(f, "local"),
        }
    }
}

/// Normalized control intent consumed once by the lifecycle state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub source: CommandSource,
    pub command: ControlCommand,
    /// Only cluster events carry a version
    pub version: Option<i64>,
    pub observed_at: DateTime<Utc>,
}

impl CommandEvent {
    pub fn cluster(record: &ControlRecord) -> Self {
        Self {
            source: CommandSource::Cluster,
            command: record.command,
            version: Some(record.version),
            observed_at: Utc::now(),
        }
    }

    pub fn local(command: ControlCommand) -> Self {
        Self {
            source: CommandSource::Local,
            command,
            version: None,
            observed_at: Utc::now(),
        }
    }
}
