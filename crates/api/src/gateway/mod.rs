//! Server-sent event stream for one job.
//!
//! Every connection gets its own broker subscription, opened before the
//! snapshot is read so nothing published in between is lost. The first
//! message is always the snapshot (or an `info` message for an unknown
//! job); live events follow as unnamed `data:` messages until the run ends.

mod filter;

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use scribe_db::JobSnapshot;
use scribe_events::{JobEvent, Subscription};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::state::AppState;

pub use filter::SnapshotFilter;

/// GET /api/v1/jobs/{id}/stream
pub async fn stream_job(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = state.publisher.subscribe_raw(&external_id).await?;
    let snapshot = state.store.snapshot(&external_id).await?;

    tracing::info!(
        job_id = %external_id,
        found = snapshot.is_some(),
        "Stream client connected",
    );

    let stream = job_stream(
        external_id,
        subscription,
        snapshot,
        state.shutdown.child_token(),
    );
    let keep_alive =
        KeepAlive::new().interval(Duration::from_secs(state.config.sse_keepalive_secs));
    Ok(Sse::new(stream).keep_alive(keep_alive))
}

/// Logs when the client goes away, however the stream ends.
struct ConnectionGuard(String);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        tracing::info!(job_id = %self.0, "Stream client disconnected");
    }
}

fn job_stream(
    external_id: String,
    mut subscription: Subscription,
    snapshot: Option<JobSnapshot>,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = ConnectionGuard(external_id);

        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => {
                let info = json!({ "type": "info", "message": "job not found" });
                yield Ok(Event::default().event("info").data(info.to_string()));
                return;
            }
        };

        let mut filter = SnapshotFilter::new(&snapshot);
        let initial = JobEvent::JobSnapshot {
            status: snapshot.job.status,
            sections: snapshot.sections,
        };
        match serde_json::to_string(&initial) {
            Ok(payload) => yield Ok(Event::default().event("snapshot").data(payload)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode job snapshot");
                return;
            }
        }

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                next = subscription.next() => next,
            };
            let Some(raw) = next else { break };

            match serde_json::from_str::<JobEvent>(&raw) {
                Ok(event) => {
                    if !filter.admit(&event) {
                        continue;
                    }
                    yield Ok(Event::default().data(raw));
                    if event.ends_run() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Forwarding unrecognised event verbatim");
                    yield Ok(Event::default().data(raw));
                }
            }
        }
    }
}
