pub mod agent;
pub mod cluster;
pub mod system;

pub use agent::*;
pub use cluster::*;
pub use system::*;

use axum::http::StatusCode;
use tracing::warn;

use crate::error::DroverError;

/// Map a control error onto an HTTP status and message
pub(crate) fn error_response(err: DroverError) -> (StatusCode, String) {
    let status = match &err {
        DroverError::InvalidStateTransition { .. }
        | DroverError::InvalidCommand(_)
        | DroverError::Validation(_) => StatusCode::BAD_REQUEST,
        DroverError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!("API request failed: {}", err);
    }

    let message = match err {
        DroverError::InvalidStateTransition { from, to } => {
            format!("Cannot transition from state {} to {}", from, to)
        }
        other => other.to_string(),
    };
    (status, message)
}
