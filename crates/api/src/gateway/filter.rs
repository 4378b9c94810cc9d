//! Drops live events that a freshly sent snapshot already reflects.
//!
//! The gateway subscribes before reading the snapshot, so events published
//! in between arrive after a snapshot that already contains their effect.
//! For each section the filter compares incoming events against the
//! snapshot until the first event that is newer than it; from then on that
//! section's events pass unchanged.

use std::collections::HashMap;

use scribe_core::status::{JobStatus, SectionStatus};
use scribe_db::JobSnapshot;
use scribe_events::JobEvent;

#[derive(Debug, Clone, Copy)]
struct SectionView {
    status: SectionStatus,
    progress: u8,
}

#[derive(Debug)]
pub struct SnapshotFilter {
    job_status: Option<JobStatus>,
    sections: HashMap<String, SectionView>,
}

impl SnapshotFilter {
    pub fn new(snapshot: &JobSnapshot) -> Self {
        let sections = snapshot
            .sections
            .iter()
            .map(|s| {
                (
                    s.section_id.clone(),
                    SectionView {
                        status: s.status,
                        progress: s.progress.clamp(0, 100) as u8,
                    },
                )
            })
            .collect();
        Self {
            job_status: Some(snapshot.job.status),
            sections,
        }
    }

    /// Whether `event` should be forwarded to the client.
    pub fn admit(&mut self, event: &JobEvent) -> bool {
        if let Some(section_id) = event.section_id() {
            let implied = self
                .sections
                .get(section_id)
                .is_some_and(|view| implied_by(*view, event));
            if implied {
                return false;
            }
            self.sections.remove(section_id);
            self.job_status = None;
            return true;
        }

        let implied = matches!(event, JobEvent::JobStarted { .. })
            && self.job_status == Some(JobStatus::Running);
        if implied {
            return false;
        }
        self.job_status = None;
        true
    }
}

fn implied_by(view: SectionView, event: &JobEvent) -> bool {
    use SectionStatus::*;

    match event {
        JobEvent::SectionQueued { .. } => matches!(view.status, Queued | Generating),
        JobEvent::SectionProgress { progress, .. } => match view.status {
            Generating | Diffing => *progress <= view.progress,
            Complete | Failed => true,
            _ => false,
        },
        JobEvent::SectionDiffing { .. } => view.status == Diffing,
        JobEvent::SectionComplete { .. } => view.status == Complete,
        JobEvent::SectionFailed { .. } => view.status == Failed,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use scribe_core::generation::GenerationConfig;
    use scribe_db::models::job::Job;
    use scribe_db::models::section::Section;

    use super::*;

    fn snapshot(job_status: JobStatus, sections: &[(&str, SectionStatus, i16)]) -> JobSnapshot {
        let now = Utc::now();
        JobSnapshot {
            job: Job {
                id: 1,
                external_id: "J".into(),
                status: job_status,
                config: GenerationConfig::default(),
                started_at: Some(now),
                completed_at: None,
                total_tokens: 0,
                created_at: now,
                updated_at: now,
            },
            sections: sections
                .iter()
                .enumerate()
                .map(|(i, (id, status, progress))| Section {
                    id: i as i64 + 1,
                    job_id: 1,
                    section_id: id.to_string(),
                    status: *status,
                    progress: *progress,
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
                })
                .collect(),
        }
    }

    fn progress(section: &str, progress: u8) -> JobEvent {
        JobEvent::SectionProgress {
            section_id: section.into(),
            progress,
        }
    }

    #[test]
    fn stale_progress_is_dropped_until_a_newer_value_arrives() {
        let snap = snapshot(JobStatus::Running, &[("a", SectionStatus::Generating, 40)]);
        let mut filter = SnapshotFilter::new(&snap);

        assert!(!filter.admit(&JobEvent::SectionQueued { section_id: "a".into() }));
        assert!(!filter.admit(&progress("a", 20)));
        assert!(!filter.admit(&progress("a", 40)));
        assert!(filter.admit(&progress("a", 60)));
        // Disarmed: later events pass even if they look stale.
        assert!(filter.admit(&progress("a", 10)));
    }

    #[test]
    fn terminal_section_swallows_its_own_history() {
        let snap = snapshot(JobStatus::Running, &[("a", SectionStatus::Complete, 100)]);
        let mut filter = SnapshotFilter::new(&snap);

        assert!(!filter.admit(&progress("a", 90)));
        assert!(!filter.admit(&JobEvent::SectionComplete {
            section_id: "a".into(),
            content: "x".into(),
            token_count: 1,
            diff: None,
        }));
    }

    #[test]
    fn regeneration_of_a_complete_section_passes() {
        let snap = snapshot(JobStatus::Running, &[("a", SectionStatus::Complete, 100)]);
        let mut filter = SnapshotFilter::new(&snap);

        assert!(filter.admit(&JobEvent::SectionDiffing { section_id: "a".into() }));
        assert!(filter.admit(&progress("a", 30)));
    }

    #[test]
    fn sections_absent_from_the_snapshot_always_pass() {
        let snap = snapshot(JobStatus::Running, &[("a", SectionStatus::Complete, 100)]);
        let mut filter = SnapshotFilter::new(&snap);

        assert!(filter.admit(&JobEvent::SectionQueued { section_id: "b".into() }));
        assert!(filter.admit(&progress("b", 10)));
    }

    #[test]
    fn job_started_is_implied_by_a_running_job() {
        let mut filter = SnapshotFilter::new(&snapshot(JobStatus::Running, &[]));
        assert!(!filter.admit(&JobEvent::JobStarted { external_id: "J".into() }));

        let mut filter = SnapshotFilter::new(&snapshot(JobStatus::Idle, &[]));
        assert!(filter.admit(&JobEvent::JobStarted { external_id: "J".into() }));
    }

    #[test]
    fn job_endings_are_never_filtered() {
        let snap = snapshot(JobStatus::Complete, &[]);
        let mut filter = SnapshotFilter::new(&snap);
        assert!(filter.admit(&JobEvent::JobComplete {
            external_id: "J".into(),
            failed_sections: 0,
        }));
        assert!(filter.admit(&JobEvent::JobCancelled { external_id: "J".into() }));
    }
}
