use axum::routing::{get, post};
use axum::Router;

use crate::gateway;
use crate::handlers::jobs;
use crate::state::AppState;

/// Job routes mounted at `/jobs`.
///
/// ```text
/// POST   /                                  -> create_job
/// GET    /{id}                              -> get_job
/// POST   /{id}/start                        -> start_job
/// GET    /{id}/stream                       -> stream_job
/// POST   /{id}/cancel                       -> cancel_job
/// POST   /{id}/simulate                     -> simulate_job
/// POST   /{id}/sections/{section_id}/retry  -> retry_section
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/start", post(jobs::start_job))
        .route("/{id}/stream", get(gateway::stream_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/simulate", post(jobs::simulate_job))
        .route(
            "/{id}/sections/{section_id}/retry",
            post(jobs::retry_section),
        )
}
