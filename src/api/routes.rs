use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Probes
        .route("/health", get(handlers::health_handler))
        .route("/readiness", get(handlers::readiness_handler))
        .route("/metrics", get(handlers::metrics_handler))
        // Local agent control
        .route("/api/agent/state", get(handlers::get_state))
        .route("/api/agent/pause", post(handlers::pause))
        .route("/api/agent/resume", post(handlers::resume))
        .route("/api/agent/shutdown", post(handlers::shutdown))
        // Cluster-wide control
        .route("/api/cluster/state", get(handlers::get_cluster_state))
        .route("/api/cluster/pause", post(handlers::pause_all))
        .route("/api/cluster/resume", post(handlers::resume_all))
        .route("/api/cluster/shutdown", post(handlers::shutdown_all))
        // System endpoints
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/config", get(handlers::get_config))
        .route("/api/store/status", get(handlers::store_status))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
