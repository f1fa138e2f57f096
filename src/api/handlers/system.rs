use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;

use crate::api::{state::AppState, types::*};
use crate::config::PublicConfig;

/// GET /health -- liveness; 200 for as long as the process serves requests
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "alive".to_string(),
        timestamp: Utc::now(),
        state: state.lifecycle.current(),
    })
}

/// GET /readiness -- 200 only while RUNNING
pub async fn readiness_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let current = state.lifecycle.current();
    let (status, label) = if current.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            timestamp: Utc::now(),
            state: current,
        }),
    )
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let snapshot = state.lifecycle.snapshot().await;

    Json(StatsResponse {
        instance_id: state.config.instance_id.clone(),
        state: snapshot.state,
        batches_processed: snapshot.stats.batches_processed,
        documents_processed: snapshot.stats.documents_processed,
        errors_count: snapshot.stats.errors_count,
        last_heartbeat: snapshot.stats.last_heartbeat,
        last_applied_cluster_version: snapshot.last_applied_cluster_version,
        uptime_seconds: state.uptime_seconds(),
    })
}

/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Json<PublicConfig> {
    Json(state.config.as_ref().clone())
}

/// GET /api/store/status
pub async fn store_status(
    State(state): State<AppState>,
) -> (StatusCode, Json<StoreStatusResponse>) {
    match state.cluster.cluster_state().await {
        Ok(record) => (
            StatusCode::OK,
            Json(StoreStatusResponse {
                connected: true,
                record_version: Some(record.version),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StoreStatusResponse {
                connected: false,
                record_version: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}

/// GET /metrics -- Prometheus text exposition
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.lifecycle.snapshot().await;
    let uptime = state.uptime_seconds().max(0) as u64;
    let body = state
        .metrics
        .prometheus(&snapshot, state.watch_mode(), uptime);

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
