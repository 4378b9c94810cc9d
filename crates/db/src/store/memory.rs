use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use scribe_core::error::CoreError;
use scribe_core::generation::GenerationConfig;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_core::types::DbId;
use tokio::sync::RwLock;

use super::{JobSnapshot, JobStore, SectionCompletion};
use crate::error::StoreResult;
use crate::models::job::Job;
use crate::models::section::Section;

/// In-process [`JobStore`] with the same transition rules as the Postgres
/// store. Used by tests and single-process development setups.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    next_job_id: DbId,
    next_section_id: DbId,
    jobs: HashMap<DbId, Job>,
    by_external_id: HashMap<String, DbId>,
    /// Keyed by primary key so iteration follows creation order.
    sections: BTreeMap<DbId, Section>,
}

impl Inner {
    fn job_mut(&mut self, job_id: DbId) -> StoreResult<&mut Job> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| CoreError::not_found("Job", job_id).into())
    }

    fn section_mut(&mut self, id: DbId) -> StoreResult<&mut Section> {
        self.sections
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("Section", id).into())
    }

    fn sections_of(&self, job_id: DbId) -> Vec<Section> {
        self.sections
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, external_id: &str, config: &GenerationConfig) -> StoreResult<Job> {
        let mut inner = self.inner.write().await;
        if inner.by_external_id.contains_key(external_id) {
            return Err(CoreError::Conflict(format!("job '{external_id}' already exists")).into());
        }

        inner.next_job_id += 1;
        let now = Utc::now();
        let job = Job {
            id: inner.next_job_id,
            external_id: external_id.to_string(),
            status: JobStatus::Idle,
            config: config.clone(),
            started_at: None,
            completed_at: None,
            total_tokens: 0,
            created_at: now,
            updated_at: now,
        };
        inner.by_external_id.insert(external_id.to_string(), job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_job(&self, external_id: &str) -> StoreResult<Option<Job>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_external_id
            .get(external_id)
            .and_then(|id| inner.jobs.get(id))
            .cloned())
    }

    async fn snapshot(&self, external_id: &str) -> StoreResult<Option<JobSnapshot>> {
        let inner = self.inner.read().await;
        let Some(job) = inner
            .by_external_id
            .get(external_id)
            .and_then(|id| inner.jobs.get(id))
            .cloned()
        else {
            return Ok(None);
        };
        let sections = inner.sections_of(job.id);
        Ok(Some(JobSnapshot { job, sections }))
    }

    async fn mark_job_running(&self, job_id: DbId) -> StoreResult<Option<Job>> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status == JobStatus::Cancelled {
            return Ok(None);
        }
        let now = Utc::now();
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.completed_at = None;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn finish_job(&self, job_id: DbId, status: JobStatus) -> StoreResult<Option<Job>> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(None);
        }
        let now = Utc::now();
        job.status = status;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn reset_job(&self, job_id: DbId) -> StoreResult<Job> {
        let mut inner = self.inner.write().await;
        let job = inner.job_mut(job_id)?;
        job.status = JobStatus::Idle;
        job.completed_at = None;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn list_sections(&self, job_id: DbId) -> StoreResult<Vec<Section>> {
        Ok(self.inner.read().await.sections_of(job_id))
    }

    async fn find_section(&self, job_id: DbId, section_id: &str) -> StoreResult<Option<Section>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sections
            .values()
            .find(|s| s.job_id == job_id && s.section_id == section_id)
            .cloned())
    }

    async fn queue_section(&self, job_id: DbId, section_id: &str) -> StoreResult<Section> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job_id) {
            return Err(CoreError::not_found("Job", job_id).into());
        }
        let now = Utc::now();

        let existing = inner
            .sections
            .values_mut()
            .find(|s| s.job_id == job_id && s.section_id == section_id);
        if let Some(section) = existing {
            section.status = SectionStatus::Queued;
            section.progress = 0;
            section.error = None;
            section.started_at = None;
            section.completed_at = None;
            section.updated_at = now;
            return Ok(section.clone());
        }

        inner.next_section_id += 1;
        let section = Section {
            id: inner.next_section_id,
            job_id,
            section_id: section_id.to_string(),
            status: SectionStatus::Queued,
            progress: 0,
            content: None,
            previous_content: None,
            diff: None,
            error: None,
            token_count: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.sections.insert(section.id, section.clone());
        Ok(section)
    }

    async fn activate_section(&self, id: DbId, status: SectionStatus) -> StoreResult<Section> {
        let mut inner = self.inner.write().await;
        let section = inner.section_mut(id)?;
        let now = Utc::now();
        section.status = status;
        section.progress = 0;
        section.error = None;
        section.started_at = Some(now);
        section.completed_at = None;
        section.updated_at = now;
        Ok(section.clone())
    }

    async fn update_section_progress(&self, id: DbId, progress: u8) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let section = inner.section_mut(id)?;
        if section.status.is_active() && section.status != SectionStatus::Queued {
            section.progress = section.progress.max(i16::from(progress));
            section.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_section(
        &self,
        id: DbId,
        completion: &SectionCompletion,
    ) -> StoreResult<Section> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let section = inner.section_mut(id)?;
        if completion.diff.is_some() {
            section.previous_content = section.content.take();
        }
        section.status = SectionStatus::Complete;
        section.content = Some(completion.content.clone());
        section.token_count = Some(completion.token_count);
        section.progress = 100;
        section.diff = completion.diff.clone();
        section.error = None;
        section.completed_at = Some(now);
        section.updated_at = now;
        let section = section.clone();

        let job = inner.job_mut(section.job_id)?;
        job.total_tokens += completion.token_count;
        job.updated_at = now;

        Ok(section)
    }

    async fn fail_section(&self, id: DbId, error: &str) -> StoreResult<Section> {
        let mut inner = self.inner.write().await;
        let section = inner.section_mut(id)?;
        let now = Utc::now();
        section.status = SectionStatus::Failed;
        section.error = Some(error.to_string());
        section.attempts += 1;
        section.completed_at = Some(now);
        section.updated_at = now;
        Ok(section.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
