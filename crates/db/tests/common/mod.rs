//! Store behaviour shared by the Postgres and in-memory suites.
//!
//! Each check takes a `&dyn JobStore` so both implementations are held to
//! the same transition rules.

use scribe_core::diff;
use scribe_core::generation::GenerationConfig;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_db::{JobStore, SectionCompletion};

pub async fn job_lifecycle(store: &dyn JobStore) {
    let job = store
        .create_job("RTQCC-1-lifecycle", &GenerationConfig::default())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Idle);
    assert_eq!(job.total_tokens, 0);
    assert!(job.started_at.is_none());

    let running = store.mark_job_running(job.id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.started_at.is_some());

    let done = store
        .finish_job(job.id, JobStatus::Complete)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Complete);
    assert!(done.completed_at.is_some());

    // Terminal jobs do not move again until reset.
    assert!(store
        .finish_job(job.id, JobStatus::Failed)
        .await
        .unwrap()
        .is_none());

    let reset = store.reset_job(job.id).await.unwrap();
    assert_eq!(reset.status, JobStatus::Idle);
    assert!(reset.completed_at.is_none());
}

pub async fn cancelled_job_cannot_start(store: &dyn JobStore) {
    let job = store
        .create_job("RTQCC-1-cancelled", &GenerationConfig::default())
        .await
        .unwrap();
    store
        .finish_job(job.id, JobStatus::Cancelled)
        .await
        .unwrap()
        .unwrap();

    assert!(store.mark_job_running(job.id).await.unwrap().is_none());
    let job = store.find_job("RTQCC-1-cancelled").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

pub async fn section_success_path(store: &dyn JobStore) {
    let job = store
        .create_job("RTQCC-1-success", &GenerationConfig::default())
        .await
        .unwrap();

    let queued = store.queue_section(job.id, "fundamentals").await.unwrap();
    assert_eq!(queued.status, SectionStatus::Queued);
    assert_eq!(queued.attempts, 0);

    let generating = store
        .activate_section(queued.id, SectionStatus::Generating)
        .await
        .unwrap();
    assert_eq!(generating.status, SectionStatus::Generating);
    assert!(generating.started_at.is_some());

    store.update_section_progress(queued.id, 40).await.unwrap();
    store.update_section_progress(queued.id, 20).await.unwrap();
    let section = store
        .find_section(job.id, "fundamentals")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(section.progress, 40, "stored progress must not regress");

    let complete = store
        .complete_section(
            queued.id,
            &SectionCompletion {
                content: "# Fundamentals\n".into(),
                token_count: 120,
                diff: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(complete.status, SectionStatus::Complete);
    assert_eq!(complete.progress, 100);
    assert_eq!(complete.token_count, Some(120));
    assert!(complete.completed_at.is_some());

    let job = store.find_job("RTQCC-1-success").await.unwrap().unwrap();
    assert_eq!(job.total_tokens, 120);
}

pub async fn section_failure_counts_attempts(store: &dyn JobStore) {
    let job = store
        .create_job("RTQCC-1-failure", &GenerationConfig::default())
        .await
        .unwrap();

    for expected in 1..=2 {
        let section = store.queue_section(job.id, "validation").await.unwrap();
        store
            .activate_section(section.id, SectionStatus::Generating)
            .await
            .unwrap();
        let failed = store
            .fail_section(section.id, "Generation cancelled")
            .await
            .unwrap();
        assert_eq!(failed.status, SectionStatus::Failed);
        assert_eq!(failed.attempts, expected);
        assert_eq!(failed.error.as_deref(), Some("Generation cancelled"));
    }

    // Re-queueing clears the error but keeps the attempt count.
    let requeued = store.queue_section(job.id, "validation").await.unwrap();
    assert_eq!(requeued.status, SectionStatus::Queued);
    assert_eq!(requeued.attempts, 2);
    assert!(requeued.error.is_none());

    let job = store.find_job("RTQCC-1-failure").await.unwrap().unwrap();
    assert_eq!(job.total_tokens, 0);
}

pub async fn diffing_keeps_previous_content(store: &dyn JobStore) {
    let job = store
        .create_job("RTQCC-1-diff", &GenerationConfig::default())
        .await
        .unwrap();
    let section = store.queue_section(job.id, "economics").await.unwrap();
    store
        .activate_section(section.id, SectionStatus::Generating)
        .await
        .unwrap();
    store
        .complete_section(
            section.id,
            &SectionCompletion {
                content: "v1\n".into(),
                token_count: 10,
                diff: None,
            },
        )
        .await
        .unwrap();

    let diffing = store
        .activate_section(section.id, SectionStatus::Diffing)
        .await
        .unwrap();
    assert_eq!(diffing.status, SectionStatus::Diffing);
    assert_eq!(diffing.content.as_deref(), Some("v1\n"));

    let summary = diff::summarize("v1\n", "v2\n");
    let redone = store
        .complete_section(
            section.id,
            &SectionCompletion {
                content: "v2\n".into(),
                token_count: 15,
                diff: Some(summary.clone()),
            },
        )
        .await
        .unwrap();
    assert_eq!(redone.content.as_deref(), Some("v2\n"));
    assert_eq!(redone.previous_content.as_deref(), Some("v1\n"));
    assert_eq!(redone.diff, Some(summary));

    let job = store.find_job("RTQCC-1-diff").await.unwrap().unwrap();
    assert_eq!(job.total_tokens, 25);
}

pub async fn snapshot_lists_sections_in_order(store: &dyn JobStore) {
    let job = store
        .create_job("RTQCC-1-snapshot", &GenerationConfig::default())
        .await
        .unwrap();
    for id in ["b", "a", "c"] {
        store.queue_section(job.id, id).await.unwrap();
    }

    let snapshot = store.snapshot("RTQCC-1-snapshot").await.unwrap().unwrap();
    assert_eq!(snapshot.job.id, job.id);
    let ids: Vec<_> = snapshot
        .sections
        .iter()
        .map(|s| s.section_id.as_str())
        .collect();
    assert_eq!(ids, vec!["b", "a", "c"]);

    assert!(store.snapshot("RTQCC-missing").await.unwrap().is_none());
}
