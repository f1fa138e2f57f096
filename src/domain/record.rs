use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::command::ControlCommand;

/// Well-known key of the cluster-wide control record
pub const DEFAULT_RECORD_KEY: &str = "global_control";

/// The single versioned document holding the desired cluster command.
///
/// `version` is the only ordering and de-duplication key: it increases by one
/// on every successful write and readers never act on a version they have
/// already applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub key: String,
    pub command: ControlCommand,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl ControlRecord {
    /// Record created lazily the first time the key is read
    pub fn initial(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            command: ControlCommand::Running,
            version: 0,
            timestamp: Utc::now(),
            reason: Some("Initial state".to_string()),
            updated_by: Some("system".to_string()),
        }
    }

    /// Build the record that replaces this one in a conditional write
    pub fn successor(
        &self,
        command: ControlCommand,
        reason: Option<String>,
        updated_by: Option<String>,
    ) -> Self {
        Self {
            key: self.key.clone(),
            command,
            version: self.version + 1,
            timestamp: Utc::now(),
            reason,
            updated_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_record() {
        let record = ControlRecord::initial(DEFAULT_RECORD_KEY);
        assert_eq!(record.command, ControlCommand::Running);
        assert_eq!(record.version, 0);
        assert_eq!(record.key, "global_control");
    }

    #[test]
    fn test_successor_bumps_version() {
        let record = ControlRecord::initial("k");
        let next = record.successor(
            ControlCommand::Pause,
            Some("maintenance".into()),
            Some("ops".into()),
        );
        assert_eq!(next.version, 1);
        assert_eq!(next.command, ControlCommand::Pause);
        assert_eq!(next.key, "k");
        assert_eq!(next.updated_by.as_deref(), Some("ops"));
    }
}
