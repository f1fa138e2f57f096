use thiserror::Error;

/// Main error type for the worker
#[derive(Error, Debug)]
pub enum DroverError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Control store errors
    #[error("Control store unavailable: {0}")]
    Store(String),

    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Concurrent modification of control record after {attempts} attempts")]
    ConcurrentModification { attempts: u32 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Lifecycle errors
    #[error("Component failure: {component} - {reason}")]
    ComponentFailure { component: String, reason: String },

    #[error("Shutdown grace timeout exceeded after {timeout_secs}s")]
    ShutdownTimeout { timeout_secs: u64 },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl DroverError {
    /// Errors that should be retried with backoff rather than surfaced.
    pub fn is_transient(&self) -> bool {
        match self {
            DroverError::Store(_) | DroverError::Io(_) => true,
            DroverError::Database(e) => !matches!(
                e,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            _ => false,
        }
    }

    /// The store cannot provide the requested feature in this deployment.
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, DroverError::CapabilityUnavailable(_))
    }
}

/// Result type alias for DroverError
pub type Result<T> = std::result::Result<T, DroverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DroverError::Store("connection reset".into()).is_transient());
        assert!(!DroverError::Store("x".into()).is_capability_unavailable());
        assert!(DroverError::CapabilityUnavailable("no listen".into()).is_capability_unavailable());
        assert!(!DroverError::CapabilityUnavailable("no listen".into()).is_transient());
        assert!(!DroverError::Cancelled.is_transient());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = DroverError::InvalidStateTransition {
            from: "PAUSED".into(),
            to: "PAUSED".into(),
        };
        assert_eq!(err.to_string(), "Invalid state transition: from PAUSED to PAUSED");
    }
}
