//! The Job Store: durable record of job and section state.
//!
//! The worker is the only writer for a given job while it holds that job's
//! queue entry; the API writes only at ingress (create, start, cancel).
//! Both go through [`JobStore`] so the orchestration core can run against
//! Postgres in production and [`MemoryJobStore`] in tests.

mod memory;
mod postgres;

use async_trait::async_trait;
use scribe_core::diff::DiffSummary;
use scribe_core::generation::GenerationConfig;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_core::types::DbId;
use serde::Serialize;

use crate::error::StoreResult;
use crate::models::job::Job;
use crate::models::section::Section;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// A job together with all of its sections, read at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job: Job,
    pub sections: Vec<Section>,
}

/// Result of a successful generation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionCompletion {
    pub content: String,
    pub token_count: i64,
    /// Present when an already-complete section was regenerated.
    pub diff: Option<DiffSummary>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `idle` job. Fails with a conflict if the id is taken.
    async fn create_job(&self, external_id: &str, config: &GenerationConfig) -> StoreResult<Job>;

    async fn find_job(&self, external_id: &str) -> StoreResult<Option<Job>>;

    /// Job and sections read consistently.
    async fn snapshot(&self, external_id: &str) -> StoreResult<Option<JobSnapshot>>;

    /// `-> running`. `None` if the job was cancelled (or deleted) meanwhile.
    async fn mark_job_running(&self, job_id: DbId) -> StoreResult<Option<Job>>;

    /// `-> complete | failed | cancelled`. `None` if already terminal.
    async fn finish_job(&self, job_id: DbId, status: JobStatus) -> StoreResult<Option<Job>>;

    /// Terminal `-> idle`, ahead of a restart.
    async fn reset_job(&self, job_id: DbId) -> StoreResult<Job>;

    async fn list_sections(&self, job_id: DbId) -> StoreResult<Vec<Section>>;

    async fn find_section(&self, job_id: DbId, section_id: &str) -> StoreResult<Option<Section>>;

    /// Create the section as `queued` or reset it to `queued`.
    async fn queue_section(&self, job_id: DbId, section_id: &str) -> StoreResult<Section>;

    /// `queued -> generating` or `complete -> diffing`; stamps `startedAt`.
    async fn activate_section(&self, id: DbId, status: SectionStatus) -> StoreResult<Section>;

    /// Persist a sampled progress value; stored progress never decreases.
    async fn update_section_progress(&self, id: DbId, progress: u8) -> StoreResult<()>;

    /// `-> complete`, adding the tokens to the job total in the same write.
    async fn complete_section(
        &self,
        id: DbId,
        completion: &SectionCompletion,
    ) -> StoreResult<Section>;

    /// `-> failed`, incrementing the attempt counter.
    async fn fail_section(&self, id: DbId, error: &str) -> StoreResult<Section>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> StoreResult<()>;
}
