//! Handlers for the `/jobs` resource.
//!
//! Ingress never runs generation itself: it records the job, then hands a
//! command to the durable queue. At most one unacknowledged entry exists per
//! job; [`WorkQueue::enqueue_exclusive`] enforces that atomically and the
//! worker clears the marker after acknowledging.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use scribe_core::error::CoreError;
use scribe_core::generation::{validate_config, validate_section_id, GenerationConfig};
use scribe_core::naming::{generate_external_id, is_valid_external_id};
use scribe_core::status::JobStatus;
use scribe_db::models::job::{CreateJob, Job};
use scribe_events::{ControlMessage, JobEvent};
use scribe_queue::{EnqueueOutcome, QueueCommand, WorkQueue};

use crate::error::{AppError, AppResult};
use crate::response::{DataResponse, QueuedCommand, SimulationStarted};
use crate::simulate;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job by external id, mapping a missing row to `NotFound`.
async fn find_job(state: &AppState, external_id: &str) -> AppResult<Job> {
    if !is_valid_external_id(external_id) {
        return Err(AppError::Core(CoreError::not_found("Job", external_id)));
    }
    state
        .store
        .find_job(external_id)
        .await?
        .ok_or_else(|| AppError::Core(CoreError::not_found("Job", external_id)))
}

/// Fail fast with a conflict when the job already has a command waiting.
async fn ensure_not_outstanding(queue: &dyn WorkQueue, external_id: &str) -> AppResult<()> {
    if queue.is_outstanding(external_id).await? {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Job {external_id} already has a queued command"
        ))));
    }
    Ok(())
}

/// Decode the create body. An empty body means a default configuration.
fn parse_create_body(body: &[u8]) -> AppResult<CreateJob> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateJob::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid body: {e}")))
}

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate the generation config and create an `idle` job.
pub async fn create_job(State(state): State<AppState>, body: Bytes) -> AppResult<impl IntoResponse> {
    let input = parse_create_body(&body)?;
    let config: GenerationConfig = input.config;
    validate_config(&config)?;

    let external_id = generate_external_id();
    let job = state.store.create_job(&external_id, &config).await?;

    tracing::info!(
        job_id = %job.external_id,
        sections = config.plan().len(),
        "Job created",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

/// GET /api/v1/jobs/{id}
///
/// The job with every section it has touched so far.
pub async fn get_job(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let snapshot = state
        .store
        .snapshot(&external_id)
        .await?
        .ok_or_else(|| AppError::Core(CoreError::not_found("Job", &external_id)))?;
    Ok(Json(DataResponse { data: snapshot }))
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/start
///
/// Enqueue a `start` command. A finished job is reset to `idle` first so it
/// can run again. If the queue cannot take the command the job is marked
/// `failed` and the request answers 503.
pub async fn start_job(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let mut job = find_job(&state, &external_id).await?;

    if job.status == JobStatus::Running {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Job {external_id} is already running"
        ))));
    }
    ensure_not_outstanding(state.queue.as_ref(), &external_id).await?;

    if job.status.is_terminal() {
        job = state.store.reset_job(job.id).await?;
    }

    let command = QueueCommand::start(&external_id);
    match state.queue.enqueue_exclusive(&command).await {
        Ok(EnqueueOutcome::Enqueued(entry_id)) => {
            tracing::info!(job_id = %external_id, entry_id = %entry_id, "Job start enqueued");
            Ok((
                StatusCode::ACCEPTED,
                Json(DataResponse {
                    data: QueuedCommand {
                        external_id,
                        action: command.action(),
                        section_id: None,
                        entry_id,
                    },
                }),
            ))
        }
        Ok(EnqueueOutcome::AlreadyOutstanding) => Err(AppError::Core(CoreError::Conflict(
            format!("Job {external_id} already has a queued command"),
        ))),
        Err(e) => {
            if let Err(store_err) = state.store.finish_job(job.id, JobStatus::Failed).await {
                tracing::error!(
                    job_id = %external_id,
                    error = %store_err,
                    "Failed to mark job failed after enqueue error",
                );
            }
            Err(AppError::Queue(e))
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/sections/{section_id}/retry
///
/// Enqueue a single-section `retry`. Regenerating a complete section
/// produces a diff against its previous content.
pub async fn retry_section(
    State(state): State<AppState>,
    Path((external_id, section_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    validate_section_id(&section_id)?;
    let job = find_job(&state, &external_id).await?;

    if !job.config.is_selected(&section_id) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Section {section_id} is not selected for job {external_id}"
        ))));
    }
    if job.status == JobStatus::Cancelled {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Job {external_id} is cancelled"
        ))));
    }
    ensure_not_outstanding(state.queue.as_ref(), &external_id).await?;

    if let Some(section) = state.store.find_section(job.id, &section_id).await? {
        if section.status.is_active() {
            return Err(AppError::Core(CoreError::Conflict(format!(
                "Section {section_id} is {}",
                section.status.as_str()
            ))));
        }
        if !job.config.allows_retry(section.attempts) {
            return Err(AppError::Core(CoreError::Conflict(format!(
                "Section {section_id} has used its {} retries",
                job.config.max_retries
            ))));
        }
    }

    let command = QueueCommand::retry(&external_id, &section_id);
    match state.queue.enqueue_exclusive(&command).await? {
        EnqueueOutcome::Enqueued(entry_id) => {
            tracing::info!(
                job_id = %external_id,
                section_id = %section_id,
                entry_id = %entry_id,
                "Section retry enqueued",
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(DataResponse {
                    data: QueuedCommand {
                        external_id,
                        action: command.action(),
                        section_id: Some(section_id),
                        entry_id,
                    },
                }),
            ))
        }
        EnqueueOutcome::AlreadyOutstanding => Err(AppError::Core(CoreError::Conflict(format!(
            "Job {external_id} already has a queued command"
        )))),
    }
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Mark the job `cancelled`, tell the owning worker through the control
/// channel, and announce it to stream clients.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, &external_id).await?;

    let cancelled = state
        .store
        .finish_job(job.id, JobStatus::Cancelled)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::Conflict(format!(
                "Cannot cancel job in '{}' status",
                job.status.as_str()
            )))
        })?;

    if let Err(e) = state
        .publisher
        .send_control(&external_id, ControlMessage::Cancel)
        .await
    {
        // The worker still sees the status at its next section boundary.
        tracing::warn!(job_id = %external_id, error = %e, "Failed to send cancel control message");
    }
    state
        .publisher
        .emit(
            &external_id,
            &JobEvent::JobCancelled {
                external_id: external_id.clone(),
            },
        )
        .await;

    tracing::info!(job_id = %external_id, "Job cancelled");
    Ok(Json(DataResponse { data: cancelled }))
}

// ---------------------------------------------------------------------------
// Simulate
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/simulate
///
/// Publish a scripted event sequence on the job's channel for front-end
/// development. Nothing is persisted. The task is tracked and stops when
/// the server shuts down.
pub async fn simulate_job(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !is_valid_external_id(&external_id) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Invalid job id '{external_id}'"
        ))));
    }

    let script = simulate::script(&external_id);
    let events = script.len();
    state.tasks.spawn(simulate::run(
        state.publisher.clone(),
        external_id.clone(),
        script,
        simulate::STEP_DELAY,
        state.shutdown.child_token(),
    ));

    tracing::info!(job_id = %external_id, events, "Simulation started");
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SimulationStarted {
                external_id,
                events,
            },
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_means_default_config() {
        let input = parse_create_body(b"").unwrap();
        assert_eq!(input.config, GenerationConfig::default());
        assert!(parse_create_body(b"  \n").is_ok());
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        assert!(matches!(
            parse_create_body(b"{\"config\":"),
            Err(AppError::BadRequest(_))
        ));
    }
}
