use axum::{extract::State, http::StatusCode, Json};

use super::error_response;
use crate::api::{state::AppState, types::*};
use crate::domain::ControlCommand;

async fn set_cluster_command(
    state: &AppState,
    command: ControlCommand,
    req: Option<Json<ClusterCommandRequest>>,
) -> std::result::Result<Json<ClusterCommandResponse>, (StatusCode, String)> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let updated_by = req
        .updated_by
        .or_else(|| Some(format!("api:{}", state.config.instance_id)));

    let record = state
        .cluster
        .set_command(command, req.reason, updated_by)
        .await
        .map_err(error_response)?;

    Ok(Json(ClusterCommandResponse {
        message: format!("Cluster command set to {} (v{})", record.command, record.version),
        record,
    }))
}

/// POST /api/cluster/pause
pub async fn pause_all(
    State(state): State<AppState>,
    req: Option<Json<ClusterCommandRequest>>,
) -> std::result::Result<Json<ClusterCommandResponse>, (StatusCode, String)> {
    set_cluster_command(&state, ControlCommand::Pause, req).await
}

/// POST /api/cluster/resume
pub async fn resume_all(
    State(state): State<AppState>,
    req: Option<Json<ClusterCommandRequest>>,
) -> std::result::Result<Json<ClusterCommandResponse>, (StatusCode, String)> {
    set_cluster_command(&state, ControlCommand::Running, req).await
}

/// POST /api/cluster/shutdown
pub async fn shutdown_all(
    State(state): State<AppState>,
    req: Option<Json<ClusterCommandRequest>>,
) -> std::result::Result<Json<ClusterCommandResponse>, (StatusCode, String)> {
    set_cluster_command(&state, ControlCommand::Shutdown, req).await
}

/// GET /api/cluster/state
pub async fn get_cluster_state(
    State(state): State<AppState>,
) -> std::result::Result<Json<ClusterStateResponse>, (StatusCode, String)> {
    let record = state
        .cluster
        .cluster_state()
        .await
        .map_err(error_response)?;

    Ok(Json(ClusterStateResponse {
        record,
        watch_mode: state.watch_mode(),
        last_applied_cluster_version: state.lifecycle.last_applied_cluster_version().await,
        local_state: state.lifecycle.current(),
    }))
}
