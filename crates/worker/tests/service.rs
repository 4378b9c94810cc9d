//! Worker behaviour against the in-memory queue, store and broker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{Harness, UnreachableStore, MIN_IDLE};
use futures::StreamExt;
use scribe_core::status::{JobStatus, SectionStatus};
use scribe_db::JobStore;
use scribe_events::{ControlMessage, JobEvent};
use scribe_queue::{EnqueueOutcome, EntryId, QueueCommand, QueueEntry, WorkQueue};
use scribe_worker::EntryOutcome;
use tokio_util::sync::CancellationToken;

/// Let spawned tasks run until the provider has been called `n` times.
async fn until_calls(h: &Harness, n: usize) {
    while h.provider.calls().len() < n {
        tokio::task::yield_now().await;
    }
}

/// Step the paused clock so lease renewals get a chance to run.
async fn elapse(total: Duration) {
    let step = Duration::from_secs(10);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        tokio::time::advance(step).await;
        tokio::task::yield_now().await;
        elapsed += step;
    }
}

async fn deliver(h: &Harness, consumer: &str) -> QueueEntry {
    h.queue
        .dequeue(consumer, Duration::ZERO, 1)
        .await
        .unwrap()
        .pop()
        .expect("an entry")
}

// ---------------------------------------------------------------------------
// Entry handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_entry_is_processed_and_acknowledged() {
    let h = Harness::new().await;
    h.job("J", &["a", "b"]).await;
    assert_matches!(
        h.queue.enqueue_exclusive(&QueueCommand::start("J")).await,
        Ok(EnqueueOutcome::Enqueued(_))
    );

    let service = h.service("w1");
    let entry = deliver(&h, "w1").await;
    assert_eq!(service.handle_entry(entry).await, EntryOutcome::Processed);

    assert!(h.queue.pending(10).await.unwrap().is_empty());
    assert!(!h.queue.is_outstanding("J").await.unwrap());
    let job = h.store.find_job("J").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.total_tokens, 20);
}

#[tokio::test]
async fn malformed_entry_is_acknowledged_and_dropped() {
    let h = Harness::new().await;
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("action".to_string(), "start".to_string());
    let entry = QueueEntry {
        id: h.queue.enqueue(&QueueCommand::start("ignored")).await.unwrap(),
        fields,
    };
    // Deliver the real entry so it is pending, then hand the service a
    // copy without an external id.
    deliver(&h, "w1").await;

    let service = h.service("w1");
    assert_eq!(service.handle_entry(entry).await, EntryOutcome::Dropped);
    assert!(h.queue.pending(10).await.unwrap().is_empty());
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn unknown_action_is_dropped() {
    let h = Harness::new().await;
    h.job("J", &["a"]).await;
    let id = h.queue.enqueue(&QueueCommand::start("J")).await.unwrap();
    deliver(&h, "w1").await;

    let mut entry = QueueEntry {
        id,
        fields: Default::default(),
    };
    entry.fields.insert("action".into(), "pause".into());
    entry.fields.insert("externalId".into(), "J".into());

    assert_eq!(h.service("w1").handle_entry(entry).await, EntryOutcome::Dropped);
    assert_eq!(
        h.store.find_job("J").await.unwrap().unwrap().status,
        JobStatus::Idle
    );
}

#[tokio::test]
async fn store_failure_leaves_entry_pending() {
    let h = Harness::new().await;
    h.queue
        .enqueue_exclusive(&QueueCommand::start("J"))
        .await
        .unwrap();
    let entry = deliver(&h, "w1").await;

    let service = h.service_with_store("w1", Arc::new(UnreachableStore));
    assert_eq!(service.handle_entry(entry).await, EntryOutcome::Deferred);

    let pending = h.queue.pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consumer, "w1");
    assert!(h.queue.is_outstanding("J").await.unwrap());
}

#[tokio::test]
async fn retry_entry_reruns_one_section() {
    let h = Harness::new().await;
    let job = h.job("J", &["a", "b"]).await;
    h.provider.hang_on("b");
    let service = h.service("w1");

    // First run: b hangs until cancelled through the control channel.
    h.queue.enqueue(&QueueCommand::start("J")).await.unwrap();
    let entry = deliver(&h, "w1").await;
    let mut events = h.publisher.subscribe("J").await.unwrap();
    let run = tokio::spawn({
        let service = service.clone();
        async move { service.handle_entry(entry).await }
    });
    while let Some(event) = events.next().await {
        if matches!(&event, JobEvent::SectionProgress { section_id, .. } if section_id == "b") {
            break;
        }
    }
    h.store.finish_job(job.id, JobStatus::Complete).await.unwrap();
    h.publisher
        .send_control("J", scribe_events::ControlMessage::Cancel)
        .await
        .unwrap();
    assert_eq!(run.await.unwrap(), EntryOutcome::Processed);

    let b = h.store.find_section(job.id, "b").await.unwrap().unwrap();
    assert_eq!(b.status, SectionStatus::Failed);

    // Retry b only.
    h.provider.release("b");
    h.queue
        .enqueue_exclusive(&QueueCommand::retry("J", "b"))
        .await
        .unwrap();
    let entry = deliver(&h, "w1").await;
    assert_eq!(service.handle_entry(entry).await, EntryOutcome::Processed);

    let b = h.store.find_section(job.id, "b").await.unwrap().unwrap();
    assert_eq!(b.status, SectionStatus::Complete);
    assert_eq!(h.provider.calls(), vec!["a", "b", "b"]);
    assert!(!h.queue.is_outstanding("J").await.unwrap());
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_loop_processes_enqueued_jobs_until_cancelled() {
    let h = Harness::new().await;
    h.job("J1", &["a"]).await;
    h.job("J2", &["a"]).await;
    let mut events = h.publisher.subscribe("J2").await.unwrap();

    let cancel = CancellationToken::new();
    let service = h.service("w1");
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    h.queue
        .enqueue_exclusive(&QueueCommand::start("J1"))
        .await
        .unwrap();
    h.queue
        .enqueue_exclusive(&QueueCommand::start("J2"))
        .await
        .unwrap();

    while let Some(event) = events.next().await {
        if event.ends_run() {
            break;
        }
    }
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run loop stops on cancel")
        .unwrap();

    for id in ["J1", "J2"] {
        let job = h.store.find_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }
    assert!(h.queue.pending(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_loop_survives_missing_group() {
    let h = Harness::new().await;
    let queue = Arc::new(scribe_queue::MemoryQueue::new());
    h.job("J", &["a"]).await;

    let processor = scribe_pipeline::JobProcessor::new(
        h.store.clone(),
        h.publisher.clone(),
        h.provider.clone(),
    );
    let mut settings = scribe_worker::ServiceSettings::new("w1");
    settings.block = Duration::from_millis(10);
    settings.error_backoff = Duration::from_millis(10);
    let service = scribe_worker::JobService::new(queue.clone(), processor, settings);

    let mut events = h.publisher.subscribe("J").await.unwrap();
    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    // The first dequeue fails with no group; the loop recreates it.
    queue.enqueue(&QueueCommand::start("J")).await.unwrap();
    while let Some(event) = events.next().await {
        if event.ends_run() {
            break;
        }
    }
    cancel.cancel();
    run.await.unwrap();
    assert_eq!(queue.group_count(), 1);
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

/// A worker takes the entry, marks the first section generating, then dies
/// without acknowledging. Another worker starting later recovers it.
#[tokio::test(start_paused = true)]
async fn crashed_worker_entry_is_recovered_after_idle_threshold() {
    let h = Harness::new().await;
    let job = h.job("J", &["A", "B"]).await;
    h.queue
        .enqueue_exclusive(&QueueCommand::start("J"))
        .await
        .unwrap();

    // The doomed worker's partial progress.
    deliver(&h, "crashed").await;
    h.store.mark_job_running(job.id).await.unwrap();
    let a = h.store.queue_section(job.id, "A").await.unwrap();
    h.store
        .activate_section(a.id, SectionStatus::Generating)
        .await
        .unwrap();

    // Too early: the entry is left with its owner.
    tokio::time::advance(Duration::from_secs(30)).await;
    let survivor = h.service("survivor");
    assert_eq!(survivor.init().await.unwrap(), 0);
    assert_eq!(h.queue.pending(10).await.unwrap()[0].consumer, "crashed");

    tokio::time::advance(MIN_IDLE).await;
    assert_eq!(survivor.init().await.unwrap(), 1);

    let sections = h.store.list_sections(job.id).await.unwrap();
    assert_eq!(sections.len(), 2);
    assert!(sections.iter().all(|s| s.status == SectionStatus::Complete));
    assert_eq!(
        h.store.find_job("J").await.unwrap().unwrap().status,
        JobStatus::Complete
    );
    assert!(h.queue.pending(10).await.unwrap().is_empty());
    assert!(!h.queue.is_outstanding("J").await.unwrap());
}

/// Two entries abandoned by a crashed worker are reclaimed together. While
/// the first one runs long, the second waits its turn but stays leased, so
/// a worker starting later finds nothing to take.
#[tokio::test(start_paused = true)]
async fn reclaimed_backlog_stays_owned_while_waiting() {
    let h = Harness::new().await;
    h.job("J1", &["a1"]).await;
    h.job("J2", &["a2"]).await;
    for id in ["J1", "J2"] {
        h.queue
            .enqueue_exclusive(&QueueCommand::start(id))
            .await
            .unwrap();
    }
    assert_eq!(h.queue.dequeue("crashed", Duration::ZERO, 2).await.unwrap().len(), 2);
    tokio::time::advance(MIN_IDLE + Duration::from_secs(1)).await;

    h.provider.hang_on("a1");
    let first = h.service("wa");
    let recovering = tokio::spawn(async move { first.init().await });
    until_calls(&h, 1).await;

    elapse(Duration::from_secs(80)).await;
    let reclaimed_by_b = h.service("wb").init().await.unwrap();
    assert_eq!(reclaimed_by_b, 0);
    assert_eq!(h.provider.calls(), vec!["a1"]);
    assert!(h
        .queue
        .pending(10)
        .await
        .unwrap()
        .iter()
        .all(|p| p.consumer == "wa"));

    h.publisher
        .send_control("J1", ControlMessage::Cancel)
        .await
        .unwrap();
    assert_eq!(recovering.await.unwrap().unwrap(), 2);
    assert_eq!(h.provider.calls(), vec!["a1", "a2"]);
    assert!(h.queue.pending(10).await.unwrap().is_empty());
    assert_eq!(
        h.store.find_job("J2").await.unwrap().unwrap().status,
        JobStatus::Complete
    );
}

/// Same guarantee for a multi-entry dequeue batch.
#[tokio::test(start_paused = true)]
async fn dequeued_batch_is_leased_as_a_whole() {
    let h = Harness::new().await;
    h.job("J1", &["a1"]).await;
    h.job("J2", &["a2"]).await;
    for id in ["J1", "J2"] {
        h.queue.enqueue(&QueueCommand::start(id)).await.unwrap();
    }
    let batch = h.queue.dequeue("w1", Duration::ZERO, 2).await.unwrap();

    h.provider.hang_on("a1");
    let service = h.service("w1");
    let run = tokio::spawn(async move { service.process_batch(batch).await });
    until_calls(&h, 1).await;

    elapse(Duration::from_secs(90)).await;
    assert_eq!(h.service("w2").init().await.unwrap(), 0);

    h.publisher
        .send_control("J1", ControlMessage::Cancel)
        .await
        .unwrap();
    assert_eq!(
        run.await.unwrap(),
        vec![EntryOutcome::Processed, EntryOutcome::Processed]
    );
    assert_eq!(h.provider.calls(), vec!["a1", "a2"]);
}

/// Once another consumer holds the entry, the original worker stops and
/// leaves the entry unacknowledged for its new owner.
#[tokio::test(start_paused = true)]
async fn handling_stops_when_ownership_moves() {
    let h = Harness::new().await;
    h.job("J", &["a"]).await;
    h.queue.enqueue(&QueueCommand::start("J")).await.unwrap();
    let entry = deliver(&h, "w1").await;

    h.provider.hang_on("a");
    let service = h.service("w1");
    let run = tokio::spawn(async move { service.handle_entry(entry).await });
    until_calls(&h, 1).await;

    let stolen = h
        .queue
        .claim_idle("w2", Duration::ZERO, &EntryId::ZERO, 10)
        .await
        .unwrap();
    assert_eq!(stolen.entries.len(), 1);

    let outcome = tokio::time::timeout(Duration::from_secs(30), run)
        .await
        .expect("lease renewal notices the new owner")
        .unwrap();
    assert_eq!(outcome, EntryOutcome::Abandoned);

    let pending = h.queue.pending(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consumer, "w2");
}

/// An entry reclaimed by someone else before its turn is skipped untouched.
#[tokio::test]
async fn entry_taken_before_its_turn_is_skipped() {
    let h = Harness::new().await;
    h.job("J", &["a"]).await;
    h.queue.enqueue(&QueueCommand::start("J")).await.unwrap();
    let entry = deliver(&h, "w1").await;
    h.queue
        .claim_idle("w2", Duration::ZERO, &EntryId::ZERO, 10)
        .await
        .unwrap();

    let outcomes = h.service("w1").process_batch(vec![entry]).await;
    assert_eq!(outcomes, vec![EntryOutcome::Abandoned]);
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.queue.pending(10).await.unwrap()[0].consumer, "w2");
}

#[tokio::test]
async fn ingress_never_produces_two_outstanding_entries_per_job() {
    let h = Harness::new().await;
    h.job("J", &["a"]).await;

    assert_matches!(
        h.queue.enqueue_exclusive(&QueueCommand::start("J")).await,
        Ok(EnqueueOutcome::Enqueued(_))
    );
    assert_eq!(
        h.queue
            .enqueue_exclusive(&QueueCommand::start("J"))
            .await
            .unwrap(),
        EnqueueOutcome::AlreadyOutstanding
    );

    // Two consumers race; only one can ever hold an entry for J.
    let first = h.queue.dequeue("w1", Duration::ZERO, 10).await.unwrap();
    let second = h.queue.dequeue("w2", Duration::ZERO, 10).await.unwrap();
    assert_eq!(first.len() + second.len(), 1);

    // Once processed and released, the job can be started again.
    let service = h.service("w1");
    assert_eq!(
        service.handle_entry(first.into_iter().next().unwrap()).await,
        EntryOutcome::Processed
    );
    assert_matches!(
        h.queue.enqueue_exclusive(&QueueCommand::start("J")).await,
        Ok(EnqueueOutcome::Enqueued(_))
    );
}
