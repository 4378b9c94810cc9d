//! The per-job section state machine.
//!
//! [`JobProcessor::process_start`] walks a job's planned sections strictly
//! in order, one at a time:
//!
//! ```text
//! pending -> queued -> generating -> complete | failed
//! ```
//!
//! [`JobProcessor::retry_section`] re-runs a single section; a section that
//! is already complete goes `complete -> diffing -> complete` and keeps its
//! previous content alongside a diff summary.
//!
//! Every transition is written to the Job Store before the matching event
//! is published, so a snapshot is never behind an event the worker sent.

use std::sync::Arc;

use futures::StreamExt;
use scribe_core::diff::{self, DiffSummary};
use scribe_core::progress::ProgressTracker;
use scribe_core::prompt::section_prompt;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_db::models::job::Job;
use scribe_db::models::section::Section;
use scribe_db::{JobStore, SectionCompletion};
use scribe_events::{ControlMessage, EventPublisher, JobEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ProcessError, ProviderError};
use crate::provider::{
    ProgressReporter, Provider, ProviderOutput, ProviderRequest, PROGRESS_CHANNEL_CAPACITY,
};

/// Default sampling rate for persisting progress: every 5th update.
pub const DEFAULT_PERSIST_EVERY: u32 = 5;

/// How a `start` run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every planned section reached a terminal state.
    Completed { failed_sections: usize },
    /// The job was cancelled before or during the run.
    Cancelled,
    JobNotFound,
}

/// How a single-section retry ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Completed,
    Failed,
    /// The section is not part of the job's selection.
    NotSelected,
    Cancelled,
    JobNotFound,
}

/// Terminal state of one section pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionResult {
    Complete,
    Failed,
}

/// Drives jobs through the section state machine.
///
/// Holds its collaborators explicitly; one instance is shared by every job
/// a worker processes.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    publisher: EventPublisher,
    provider: Arc<dyn Provider>,
    persist_every: u32,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: EventPublisher,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            store,
            publisher,
            provider,
            persist_every: DEFAULT_PERSIST_EVERY,
        }
    }

    /// Persist every `n`th progress update instead of the default.
    pub fn with_persist_every(mut self, n: u32) -> Self {
        self.persist_every = n;
        self
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Run a job's planned sections in order.
    ///
    /// Sections already `complete` (from an earlier, interrupted delivery)
    /// are skipped. Section failures do not stop the run; the job still
    /// completes and `job.complete` reports how many sections failed.
    pub async fn process_start(&self, external_id: &str) -> Result<RunOutcome, ProcessError> {
        let Some(job) = self.store.find_job(external_id).await? else {
            tracing::warn!(job_id = %external_id, "Start requested for unknown job");
            return Ok(RunOutcome::JobNotFound);
        };
        if job.status == JobStatus::Cancelled {
            tracing::info!(job_id = %external_id, "Job cancelled before start, skipping");
            return Ok(RunOutcome::Cancelled);
        }
        let Some(job) = self.store.mark_job_running(job.id).await? else {
            return Ok(RunOutcome::Cancelled);
        };

        tracing::info!(job_id = %external_id, "Job started");
        self.publisher
            .emit(
                external_id,
                &JobEvent::JobStarted {
                    external_id: external_id.to_string(),
                },
            )
            .await;

        let cancel = CancellationToken::new();
        let _watch = self.watch_control(external_id, cancel.clone()).await;

        let mut failed_sections = 0;
        let mut cancelled = false;
        for section_id in job.config.plan() {
            if cancel.is_cancelled() || self.cancelled_in_store(external_id).await? {
                cancelled = true;
                break;
            }

            let existing = self.store.find_section(job.id, &section_id).await?;
            if existing.is_some_and(|s| s.status == SectionStatus::Complete) {
                tracing::debug!(job_id = %external_id, section_id, "Section already complete, skipping");
                continue;
            }

            if self.generate(&job, &section_id, &cancel).await? == SectionResult::Failed {
                failed_sections += 1;
            }
        }
        cancelled |= cancel.is_cancelled();

        if cancelled {
            self.finish_cancelled(&job).await?;
            return Ok(RunOutcome::Cancelled);
        }

        match self.store.finish_job(job.id, JobStatus::Complete).await? {
            Some(_) => {
                tracing::info!(job_id = %external_id, failed_sections, "Job complete");
                self.publisher
                    .emit(
                        external_id,
                        &JobEvent::JobComplete {
                            external_id: external_id.to_string(),
                            failed_sections,
                        },
                    )
                    .await;
                Ok(RunOutcome::Completed { failed_sections })
            }
            // Cancelled through the API after the last section settled.
            None => Ok(RunOutcome::Cancelled),
        }
    }

    // -----------------------------------------------------------------------
    // Retry
    // -----------------------------------------------------------------------

    /// Re-run one section outside a full job run.
    pub async fn retry_section(
        &self,
        external_id: &str,
        section_id: &str,
    ) -> Result<RetryOutcome, ProcessError> {
        let Some(job) = self.store.find_job(external_id).await? else {
            tracing::warn!(job_id = %external_id, section_id, "Retry requested for unknown job");
            return Ok(RetryOutcome::JobNotFound);
        };
        if job.status == JobStatus::Cancelled {
            return Ok(RetryOutcome::Cancelled);
        }
        if !job.config.is_selected(section_id) {
            tracing::warn!(job_id = %external_id, section_id, "Retry requested for unselected section");
            return Ok(RetryOutcome::NotSelected);
        }

        let cancel = CancellationToken::new();
        let _watch = self.watch_control(external_id, cancel.clone()).await;

        tracing::info!(job_id = %external_id, section_id, "Retrying section");
        let result = match self.store.find_section(job.id, section_id).await? {
            Some(section) if section.status == SectionStatus::Complete => {
                self.regenerate(&job, section, &cancel).await?
            }
            _ => self.generate(&job, section_id, &cancel).await?,
        };

        Ok(match result {
            SectionResult::Complete => RetryOutcome::Completed,
            SectionResult::Failed => RetryOutcome::Failed,
        })
    }

    // -----------------------------------------------------------------------
    // Section passes
    // -----------------------------------------------------------------------

    /// `queued -> generating -> complete | failed`.
    async fn generate(
        &self,
        job: &Job,
        section_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SectionResult, ProcessError> {
        let external_id = job.external_id.as_str();

        let section = self.store.queue_section(job.id, section_id).await?;
        self.publisher
            .emit(
                external_id,
                &JobEvent::SectionQueued {
                    section_id: section_id.to_string(),
                },
            )
            .await;

        let section = self
            .store
            .activate_section(section.id, SectionStatus::Generating)
            .await?;
        tracing::debug!(job_id = %external_id, section_id, "Section generating");

        let outcome = self.invoke_provider(job, &section, cancel).await?;
        self.settle(job, &section, outcome, None).await
    }

    /// `complete -> diffing -> complete | failed`, keeping the old content.
    async fn regenerate(
        &self,
        job: &Job,
        section: Section,
        cancel: &CancellationToken,
    ) -> Result<SectionResult, ProcessError> {
        let external_id = job.external_id.as_str();
        let previous = section.content.clone().unwrap_or_default();

        let section = self
            .store
            .activate_section(section.id, SectionStatus::Diffing)
            .await?;
        self.publisher
            .emit(
                external_id,
                &JobEvent::SectionDiffing {
                    section_id: section.section_id.clone(),
                },
            )
            .await;

        let outcome = self.invoke_provider(job, &section, cancel).await?;
        let diff = outcome
            .as_ref()
            .ok()
            .map(|output| diff::summarize(&previous, &output.content));
        self.settle(job, &section, outcome, diff).await
    }

    /// Call the provider while forwarding every progress update.
    ///
    /// Each update is published; every `persist_every`th one is also
    /// written to the store first.
    async fn invoke_provider(
        &self,
        job: &Job,
        section: &Section,
        job_cancel: &CancellationToken,
    ) -> Result<Result<ProviderOutput, ProviderError>, ProcessError> {
        let request = ProviderRequest {
            section_id: section.section_id.clone(),
            prompt: section_prompt(&section.section_id, &job.config),
        };
        let (reporter, mut updates) = ProgressReporter::channel(PROGRESS_CHANNEL_CAPACITY);
        let mut tracker = ProgressTracker::new(self.persist_every);

        let generation =
            self.provider
                .generate_section(&request, reporter, job_cancel.child_token());
        tokio::pin!(generation);

        let result = loop {
            tokio::select! {
                biased;
                Some(raw) = updates.recv() => {
                    self.forward_progress(job, section, &mut tracker, raw).await?;
                }
                result = &mut generation => break result,
            }
        };
        while let Ok(raw) = updates.try_recv() {
            self.forward_progress(job, section, &mut tracker, raw).await?;
        }

        Ok(result)
    }

    async fn forward_progress(
        &self,
        job: &Job,
        section: &Section,
        tracker: &mut ProgressTracker,
        raw: f64,
    ) -> Result<(), ProcessError> {
        let update = tracker.observe(raw);
        if update.persist {
            self.store
                .update_section_progress(section.id, update.progress)
                .await?;
        }
        self.publisher
            .emit(
                &job.external_id,
                &JobEvent::SectionProgress {
                    section_id: section.section_id.clone(),
                    progress: update.progress,
                },
            )
            .await;
        Ok(())
    }

    /// Record the provider result and publish the terminal event.
    async fn settle(
        &self,
        job: &Job,
        section: &Section,
        outcome: Result<ProviderOutput, ProviderError>,
        diff: Option<DiffSummary>,
    ) -> Result<SectionResult, ProcessError> {
        let external_id = job.external_id.as_str();
        let section_id = section.section_id.as_str();

        match outcome {
            Ok(output) => {
                let completion = SectionCompletion {
                    content: output.content,
                    token_count: output.token_count,
                    diff,
                };
                self.store.complete_section(section.id, &completion).await?;
                tracing::info!(
                    job_id = %external_id,
                    section_id,
                    token_count = completion.token_count,
                    "Section complete",
                );
                self.publisher
                    .emit(
                        external_id,
                        &JobEvent::SectionComplete {
                            section_id: section_id.to_string(),
                            content: completion.content,
                            token_count: completion.token_count,
                            diff: completion.diff,
                        },
                    )
                    .await;
                Ok(SectionResult::Complete)
            }
            Err(e) => {
                let error = e.to_string();
                self.store.fail_section(section.id, &error).await?;
                tracing::warn!(job_id = %external_id, section_id, error = %error, "Section failed");
                self.publisher
                    .emit(
                        external_id,
                        &JobEvent::SectionFailed {
                            section_id: section_id.to_string(),
                            error,
                        },
                    )
                    .await;
                Ok(SectionResult::Failed)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel `token` when a `cancel` control message arrives for the job.
    ///
    /// The listener stops when the returned guard drops. Without a control
    /// subscription, cancellation is still picked up from the store at the
    /// next section boundary.
    async fn watch_control(&self, external_id: &str, token: CancellationToken) -> ControlWatch {
        let mut messages = match self.publisher.subscribe_control(external_id).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(job_id = %external_id, error = %e, "Control subscription failed");
                return ControlWatch(None);
            }
        };

        let job_id = external_id.to_string();
        let handle = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match message {
                    ControlMessage::Cancel => {
                        tracing::info!(job_id = %job_id, "Cancel requested");
                        token.cancel();
                        break;
                    }
                }
            }
        });
        ControlWatch(Some(handle))
    }

    async fn cancelled_in_store(&self, external_id: &str) -> Result<bool, ProcessError> {
        Ok(self
            .store
            .find_job(external_id)
            .await?
            .is_some_and(|job| job.status == JobStatus::Cancelled))
    }

    /// Mark the job cancelled unless something else already finished it.
    async fn finish_cancelled(&self, job: &Job) -> Result<(), ProcessError> {
        let external_id = job.external_id.as_str();
        tracing::info!(job_id = %external_id, "Job run cancelled");
        if self
            .store
            .finish_job(job.id, JobStatus::Cancelled)
            .await?
            .is_some()
        {
            self.publisher
                .emit(
                    external_id,
                    &JobEvent::JobCancelled {
                        external_id: external_id.to_string(),
                    },
                )
                .await;
        }
        Ok(())
    }
}

/// Aborts the control listener on drop.
struct ControlWatch(Option<JoinHandle<()>>);

impl Drop for ControlWatch {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}
