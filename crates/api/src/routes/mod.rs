pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                                            create (POST)
/// /jobs/{id}                                       job with sections (GET)
/// /jobs/{id}/start                                 enqueue a run (POST)
/// /jobs/{id}/stream                                server-sent events (GET)
/// /jobs/{id}/cancel                                cancel a run (POST)
/// /jobs/{id}/simulate                              scripted debug events (POST)
/// /jobs/{id}/sections/{section_id}/retry           regenerate one section (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/jobs", jobs::router())
}
