use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the job store is reachable.
    pub store_healthy: bool,
    /// Whether the queue backend answers.
    pub queue_healthy: bool,
}

/// GET /health -- returns service, store and queue health.
///
/// Responds 503 when either dependency is unreachable so load balancers
/// stop routing ingress to an instance that cannot enqueue.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (store, queue) = tokio::join!(state.store.ping(), state.queue.pending(1));
    let store_healthy = store.is_ok();
    let queue_healthy = queue.is_ok();

    let (code, status) = if store_healthy && queue_healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            store_healthy,
            queue_healthy,
        }),
    )
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
