use crate::models::HealthResponse;
use axum::Json;
use tracing::debug;

/// Liveness probe
pub async fn health_check() -> Json<HealthResponse> {
    debug!("health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "tacticboard is running".to_string(),
    })
}

/// Readiness probe
///
/// Store connectivity is not checked here; the memory store is always ready
/// and the Postgres pool reconnects lazily.
pub async fn ready_check() -> Json<HealthResponse> {
    debug!("readiness check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "tacticboard is ready".to_string(),
    })
}
