use std::sync::Arc;

use scribe_db::JobStore;
use scribe_events::EventPublisher;
use scribe_queue::WorkQueue;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Durable job and section records.
    pub store: Arc<dyn JobStore>,
    /// Queue the workers consume start and retry commands from.
    pub queue: Arc<dyn WorkQueue>,
    /// Per-job event and control channels.
    pub publisher: EventPublisher,
    pub config: Arc<ServerConfig>,
    /// Background tasks spawned by handlers (debug simulations).
    pub tasks: TaskTracker,
    /// Fires when the server begins shutting down; open streams close on it.
    pub shutdown: CancellationToken,
}
