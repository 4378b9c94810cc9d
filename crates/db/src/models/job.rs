//! Job rows and DTOs.

use scribe_core::generation::GenerationConfig;
use scribe_core::status::JobStatus;
use scribe_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: DbId,
    pub external_id: String,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    #[sqlx(json)]
    pub config: GenerationConfig,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub total_tokens: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for `POST /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJob {
    #[serde(default)]
    pub config: GenerationConfig,
}
