//! Repository for the `sections` table.

use scribe_core::diff::DiffSummary;
use scribe_core::status::SectionStatus;
use scribe_core::types::DbId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::section::Section;

/// Column list for `sections` queries.
pub(crate) const COLUMNS: &str = "\
    id, job_id, section_id, status, progress, content, previous_content, \
    diff, error, token_count, attempts, started_at, completed_at, \
    created_at, updated_at";

/// Provides lifecycle transitions for sections.
pub struct SectionRepo;

impl SectionRepo {
    /// All sections of a job, in creation (processing) order.
    pub async fn list_by_job(pool: &PgPool, job_id: DbId) -> Result<Vec<Section>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sections WHERE job_id = $1 ORDER BY id");
        sqlx::query_as::<_, Section>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find(
        pool: &PgPool,
        job_id: DbId,
        section_id: &str,
    ) -> Result<Option<Section>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sections WHERE job_id = $1 AND section_id = $2"
        );
        sqlx::query_as::<_, Section>(&query)
            .bind(job_id)
            .bind(section_id)
            .fetch_optional(pool)
            .await
    }

    /// Create the section as `queued`, or reset an existing one back to
    /// `queued` for another pass. Content from earlier passes is kept.
    pub async fn upsert_queued(
        pool: &PgPool,
        job_id: DbId,
        section_id: &str,
    ) -> Result<Section, sqlx::Error> {
        let query = format!(
            "INSERT INTO sections (job_id, section_id, status) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (job_id, section_id) DO UPDATE \
             SET status = EXCLUDED.status, progress = 0, error = NULL, \
                 started_at = NULL, completed_at = NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Section>(&query)
            .bind(job_id)
            .bind(section_id)
            .bind(SectionStatus::Queued.as_str())
            .fetch_one(pool)
            .await
    }

    /// Enter an active status (`generating` or `diffing`) with fresh progress.
    pub async fn mark_active(
        pool: &PgPool,
        id: DbId,
        status: SectionStatus,
    ) -> Result<Option<Section>, sqlx::Error> {
        let query = format!(
            "UPDATE sections \
             SET status = $2, progress = 0, error = NULL, started_at = NOW(), completed_at = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Section>(&query)
            .bind(id)
            .bind(status.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Persist a sampled progress value. Never lowers stored progress and
    /// only applies while the section is active.
    pub async fn update_progress(pool: &PgPool, id: DbId, progress: i16) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sections SET progress = GREATEST(progress, $2) \
             WHERE id = $1 AND status IN ('generating', 'diffing')",
        )
        .bind(id)
        .bind(progress)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark complete and add the tokens to the parent job, atomically.
    ///
    /// When `diff` is present the current content is moved to
    /// `previous_content` before the new content is stored.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        content: &str,
        token_count: i64,
        diff: Option<&DiffSummary>,
    ) -> Result<Option<Section>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE sections \
             SET status = $2, content = $3, token_count = $4, progress = 100, \
                 previous_content = CASE WHEN $5::jsonb IS NULL THEN previous_content ELSE content END, \
                 diff = $5, error = NULL, completed_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let section = sqlx::query_as::<_, Section>(&query)
            .bind(id)
            .bind(SectionStatus::Complete.as_str())
            .bind(content)
            .bind(token_count)
            .bind(diff.map(Json))
            .fetch_optional(&mut *tx)
            .await?;

        let Some(section) = section else {
            return Ok(None);
        };

        sqlx::query("UPDATE jobs SET total_tokens = total_tokens + $2 WHERE id = $1")
            .bind(section.job_id)
            .bind(token_count)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(section))
    }

    /// Mark failed with `error` and count the attempt.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<Option<Section>, sqlx::Error> {
        let query = format!(
            "UPDATE sections \
             SET status = $2, error = $3, attempts = attempts + 1, completed_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Section>(&query)
            .bind(id)
            .bind(SectionStatus::Failed.as_str())
            .bind(error)
            .fetch_optional(pool)
            .await
    }
}
