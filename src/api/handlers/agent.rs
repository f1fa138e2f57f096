use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::info;

use super::error_response;
use crate::api::{state::AppState, types::*};
use crate::coordination::EventOutcome;

/// GET /api/agent/state
pub async fn get_state(State(state): State<AppState>) -> Json<AgentStateResponse> {
    Json(AgentStateResponse {
        state: state.lifecycle.current(),
        timestamp: Utc::now(),
        last_applied_cluster_version: state.lifecycle.last_applied_cluster_version().await,
    })
}

/// POST /api/agent/pause
pub async fn pause(
    State(state): State<AppState>,
) -> std::result::Result<Json<MessageResponse>, (StatusCode, String)> {
    info!("Pause requested via API");
    state.control.pause().await.map_err(error_response)?;

    Ok(Json(MessageResponse {
        message: "Agent paused successfully".to_string(),
        state: state.lifecycle.current(),
    }))
}

/// POST /api/agent/resume
pub async fn resume(
    State(state): State<AppState>,
) -> std::result::Result<Json<MessageResponse>, (StatusCode, String)> {
    info!("Resume requested via API");
    state.control.resume().await.map_err(error_response)?;

    Ok(Json(MessageResponse {
        message: "Agent resumed successfully".to_string(),
        state: state.lifecycle.current(),
    }))
}

/// POST /api/agent/shutdown
///
/// 202 when shutdown starts; 200 when it was already under way.
pub async fn shutdown(
    State(state): State<AppState>,
) -> std::result::Result<(StatusCode, Json<MessageResponse>), (StatusCode, String)> {
    info!("Shutdown requested via API");
    let outcome = state.control.shutdown().await.map_err(error_response)?;

    let (status, message) = match outcome {
        EventOutcome::Unchanged { .. } => (StatusCode::OK, "Shutdown already in progress"),
        _ => (StatusCode::ACCEPTED, "Shutdown initiated"),
    };

    Ok((
        status,
        Json(MessageResponse {
            message: message.to_string(),
            state: state.lifecycle.current(),
        }),
    ))
}
