//! Wire types carried on per-job channels.

use scribe_core::diff::DiffSummary;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_db::models::section::Section;
use serde::{Deserialize, Serialize};

/// A job lifecycle event, serialized as a JSON object with a `type`
/// discriminator (`"section.progress"`, `"job.complete"`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum JobEvent {
    #[serde(rename = "job.started")]
    JobStarted { external_id: String },

    #[serde(rename = "section.queued")]
    SectionQueued { section_id: String },

    #[serde(rename = "section.progress")]
    SectionProgress { section_id: String, progress: u8 },

    #[serde(rename = "section.diffing")]
    SectionDiffing { section_id: String },

    #[serde(rename = "section.complete")]
    SectionComplete {
        section_id: String,
        content: String,
        token_count: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<DiffSummary>,
    },

    #[serde(rename = "section.failed")]
    SectionFailed { section_id: String, error: String },

    #[serde(rename = "job.complete")]
    JobComplete {
        external_id: String,
        #[serde(default)]
        failed_sections: usize,
    },

    #[serde(rename = "job.cancelled")]
    JobCancelled { external_id: String },

    /// Produced only by the streaming gateway from the Job Store.
    #[serde(rename = "job.snapshot")]
    JobSnapshot {
        status: JobStatus,
        sections: Vec<Section>,
    },
}

impl JobEvent {
    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job.started",
            Self::SectionQueued { .. } => "section.queued",
            Self::SectionProgress { .. } => "section.progress",
            Self::SectionDiffing { .. } => "section.diffing",
            Self::SectionComplete { .. } => "section.complete",
            Self::SectionFailed { .. } => "section.failed",
            Self::JobComplete { .. } => "job.complete",
            Self::JobCancelled { .. } => "job.cancelled",
            Self::JobSnapshot { .. } => "job.snapshot",
        }
    }

    /// The section this event describes, if it is a section event.
    pub fn section_id(&self) -> Option<&str> {
        match self {
            Self::SectionQueued { section_id }
            | Self::SectionProgress { section_id, .. }
            | Self::SectionDiffing { section_id }
            | Self::SectionComplete { section_id, .. }
            | Self::SectionFailed { section_id, .. } => Some(section_id),
            _ => None,
        }
    }

    /// Section status implied by this event.
    pub fn implied_section_status(&self) -> Option<SectionStatus> {
        match self {
            Self::SectionQueued { .. } => Some(SectionStatus::Queued),
            Self::SectionProgress { .. } => Some(SectionStatus::Generating),
            Self::SectionDiffing { .. } => Some(SectionStatus::Diffing),
            Self::SectionComplete { .. } => Some(SectionStatus::Complete),
            Self::SectionFailed { .. } => Some(SectionStatus::Failed),
            _ => None,
        }
    }

    /// Whether this event ends a job run.
    pub fn ends_run(&self) -> bool {
        matches!(self, Self::JobComplete { .. } | Self::JobCancelled { .. })
    }
}

/// Out-of-band instructions sent to the worker driving a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Cancel,
}
