use async_trait::async_trait;
use scribe_core::error::CoreError;
use scribe_core::generation::GenerationConfig;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_core::types::DbId;
use sqlx::PgPool;

use super::{JobSnapshot, JobStore, SectionCompletion};
use crate::error::{StoreError, StoreResult};
use crate::models::job::Job;
use crate::models::section::Section;
use crate::repositories::{job_repo, section_repo, JobRepo, SectionRepo};

/// [`JobStore`] backed by the `jobs` and `sections` tables.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn section_not_found(id: DbId) -> StoreError {
    CoreError::not_found("Section", id).into()
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, external_id: &str, config: &GenerationConfig) -> StoreResult<Job> {
        JobRepo::create(&self.pool, external_id, config)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                    CoreError::Conflict(format!("job '{external_id}' already exists")).into()
                }
                other => other.into(),
            })
    }

    async fn find_job(&self, external_id: &str) -> StoreResult<Option<Job>> {
        Ok(JobRepo::find_by_external_id(&self.pool, external_id).await?)
    }

    async fn snapshot(&self, external_id: &str) -> StoreResult<Option<JobSnapshot>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let query = format!(
            "SELECT {} FROM jobs WHERE external_id = $1",
            job_repo::COLUMNS
        );
        let Some(job) = sqlx::query_as::<_, Job>(&query)
            .bind(external_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let query = format!(
            "SELECT {} FROM sections WHERE job_id = $1 ORDER BY id",
            section_repo::COLUMNS
        );
        let sections = sqlx::query_as::<_, Section>(&query)
            .bind(job.id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(JobSnapshot { job, sections }))
    }

    async fn mark_job_running(&self, job_id: DbId) -> StoreResult<Option<Job>> {
        Ok(JobRepo::mark_running(&self.pool, job_id).await?)
    }

    async fn finish_job(&self, job_id: DbId, status: JobStatus) -> StoreResult<Option<Job>> {
        Ok(JobRepo::finish(&self.pool, job_id, status).await?)
    }

    async fn reset_job(&self, job_id: DbId) -> StoreResult<Job> {
        JobRepo::reset(&self.pool, job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Job", job_id).into())
    }

    async fn list_sections(&self, job_id: DbId) -> StoreResult<Vec<Section>> {
        Ok(SectionRepo::list_by_job(&self.pool, job_id).await?)
    }

    async fn find_section(&self, job_id: DbId, section_id: &str) -> StoreResult<Option<Section>> {
        Ok(SectionRepo::find(&self.pool, job_id, section_id).await?)
    }

    async fn queue_section(&self, job_id: DbId, section_id: &str) -> StoreResult<Section> {
        Ok(SectionRepo::upsert_queued(&self.pool, job_id, section_id).await?)
    }

    async fn activate_section(&self, id: DbId, status: SectionStatus) -> StoreResult<Section> {
        SectionRepo::mark_active(&self.pool, id, status)
            .await?
            .ok_or_else(|| section_not_found(id))
    }

    async fn update_section_progress(&self, id: DbId, progress: u8) -> StoreResult<()> {
        Ok(SectionRepo::update_progress(&self.pool, id, i16::from(progress)).await?)
    }

    async fn complete_section(
        &self,
        id: DbId,
        completion: &SectionCompletion,
    ) -> StoreResult<Section> {
        SectionRepo::complete(
            &self.pool,
            id,
            &completion.content,
            completion.token_count,
            completion.diff.as_ref(),
        )
        .await?
        .ok_or_else(|| section_not_found(id))
    }

    async fn fail_section(&self, id: DbId, error: &str) -> StoreResult<Section> {
        SectionRepo::fail(&self.pool, id, error)
            .await?
            .ok_or_else(|| section_not_found(id))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(crate::health_check(&self.pool).await?)
    }
}
