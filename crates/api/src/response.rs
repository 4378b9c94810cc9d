//! Shared response envelope types for API handlers.
//!
//! All API responses use a `{ "data": ... }` envelope.

use scribe_queue::EntryId;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// # Example
///
/// ```ignore
/// Ok(Json(DataResponse { data: job }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Acknowledgement that a command was accepted onto the queue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedCommand {
    pub external_id: String,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub entry_id: EntryId,
}

/// Acknowledgement that a debug simulation was started.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStarted {
    pub external_id: String,
    pub events: usize,
}
