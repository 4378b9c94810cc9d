//! Repository for the `jobs` table.

use scribe_core::generation::GenerationConfig;
use scribe_core::status::JobStatus;
use scribe_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::job::Job;

/// Column list for `jobs` queries.
pub(crate) const COLUMNS: &str = "\
    id, external_id, status, config, started_at, completed_at, \
    total_tokens, created_at, updated_at";

/// Statuses a job never leaves on its own.
const TERMINAL_STATUSES: [&str; 3] = ["complete", "failed", "cancelled"];

/// Provides CRUD and lifecycle transitions for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new `idle` job.
    pub async fn create(
        pool: &PgPool,
        external_id: &str,
        config: &GenerationConfig,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (external_id, status, config) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(external_id)
            .bind(JobStatus::Idle.as_str())
            .bind(Json(config))
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE external_id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    /// Move a job to `running` and stamp `started_at`.
    ///
    /// Returns `None` when the job is missing or has been cancelled; a
    /// cancellation always wins over a late start.
    pub async fn mark_running(pool: &PgPool, job_id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, started_at = NOW(), completed_at = NULL \
             WHERE id = $1 AND status <> $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Running.as_str())
            .bind(JobStatus::Cancelled.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Move a non-terminal job to a terminal status and stamp `completed_at`.
    ///
    /// Returns `None` if the job was already terminal (for example cancelled
    /// while its last section was running).
    pub async fn finish(
        pool: &PgPool,
        job_id: DbId,
        status: JobStatus,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, completed_at = NOW() \
             WHERE id = $1 AND NOT (status = ANY($3)) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(status.as_str())
            .bind(&TERMINAL_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// Put a terminal job back to `idle` so it can be started again.
    pub async fn reset(pool: &PgPool, job_id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status = $2, completed_at = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Idle.as_str())
            .fetch_optional(pool)
            .await
    }
}
