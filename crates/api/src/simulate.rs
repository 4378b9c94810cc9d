//! Scripted event sequences for front-end development.
//!
//! A simulation publishes on the real job channel but never touches the
//! store or the queue, so it can run against any id.

use std::time::Duration;

use scribe_events::{EventPublisher, JobEvent};
use tokio_util::sync::CancellationToken;

/// Pause between consecutive simulated events.
pub const STEP_DELAY: Duration = Duration::from_millis(500);

/// Section id used by every simulated run.
pub const SIMULATED_SECTION: &str = "test-section";

/// The fixed sequence a simulation publishes.
pub fn script(external_id: &str) -> Vec<JobEvent> {
    let section_id = SIMULATED_SECTION.to_string();
    vec![
        JobEvent::JobStarted {
            external_id: external_id.to_string(),
        },
        JobEvent::SectionQueued {
            section_id: section_id.clone(),
        },
        JobEvent::SectionProgress {
            section_id: section_id.clone(),
            progress: 25,
        },
        JobEvent::SectionProgress {
            section_id: section_id.clone(),
            progress: 75,
        },
        JobEvent::SectionComplete {
            section_id,
            content: "Debug content generated successfully.".to_string(),
            token_count: 42,
            diff: None,
        },
        JobEvent::JobComplete {
            external_id: external_id.to_string(),
            failed_sections: 0,
        },
    ]
}

/// Publish `events` one every `step`, stopping early on `cancel`.
pub async fn run(
    publisher: EventPublisher,
    external_id: String,
    events: Vec<JobEvent>,
    step: Duration,
    cancel: CancellationToken,
) {
    for event in events {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(job_id = %external_id, "Simulation cancelled");
                return;
            }
            _ = tokio::time::sleep(step) => {}
        }
        publisher.emit(&external_id, &event).await;
    }
    tracing::debug!(job_id = %external_id, "Simulation finished");
}
