//! Section rows.

use scribe_core::diff::DiffSummary;
use scribe_core::status::SectionStatus;
use scribe_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `sections` table.
///
/// Serialized as-is inside `job.snapshot` events and the job detail
/// response, so field names are camelCase on the wire.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: DbId,
    pub job_id: DbId,
    pub section_id: String,
    #[sqlx(try_from = "String")]
    pub status: SectionStatus,
    pub progress: i16,
    pub content: Option<String>,
    pub previous_content: Option<String>,
    #[sqlx(json(nullable))]
    pub diff: Option<DiffSummary>,
    pub error: Option<String>,
    pub token_count: Option<i64>,
    pub attempts: i32,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
