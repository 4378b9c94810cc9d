//! In-process queue with the same consumer-group semantics as the Redis
//! backend. Idle times use `tokio::time::Instant`, so tests can drive the
//! recovery threshold with a paused clock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::entry::{EntryId, QueueCommand, QueueEntry};
use crate::error::{QueueError, QueueResult};
use crate::{ClaimBatch, EnqueueOutcome, PendingEntry, WorkQueue, DEFAULT_GROUP};

pub struct MemoryQueue {
    group: String,
    state: Mutex<State>,
    arrivals: Notify,
}

#[derive(Default)]
struct State {
    log: BTreeMap<EntryId, BTreeMap<String, String>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
    outstanding: HashSet<String>,
}

#[derive(Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, Ownership>,
}

struct Ownership {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

impl State {
    fn append(&mut self, command: &QueueCommand) -> EntryId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let id = if now_ms > self.last_id.ms {
            EntryId::new(now_ms, 0)
        } else {
            EntryId::new(self.last_id.ms, self.last_id.seq + 1)
        };
        self.last_id = id;

        let fields = command
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.log.insert(id, fields);
        id
    }

    fn entry(&self, id: EntryId) -> Option<QueueEntry> {
        self.log.get(&id).map(|fields| QueueEntry {
            id,
            fields: fields.clone(),
        })
    }

    fn group_mut(&mut self, group: &str) -> QueueResult<&mut GroupState> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| QueueError::NoGroup(group.to_string()))
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_group(DEFAULT_GROUP)
    }

    pub fn with_group(group: &str) -> Self {
        Self {
            group: group.to_string(),
            state: Mutex::new(State::default()),
            arrivals: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of consumer groups on the stream.
    pub fn group_count(&self) -> usize {
        self.lock().groups.len()
    }

    /// Total entries ever appended (acknowledged or not).
    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver new entries to `consumer` without waiting.
    fn deliver(&self, consumer: &str, count: usize) -> QueueResult<Vec<QueueEntry>> {
        let mut state = self.lock();
        let start = state.group_mut(&self.group)?.last_delivered;

        let ids: Vec<EntryId> = state
            .log
            .range(start..)
            .map(|(id, _)| *id)
            .filter(|id| *id > start)
            .take(count)
            .collect();

        let entries: Vec<QueueEntry> = ids.iter().filter_map(|id| state.entry(*id)).collect();

        let group = state.group_mut(&self.group)?;
        let now = Instant::now();
        for id in &ids {
            group.last_delivered = *id;
            group.pending.insert(
                *id,
                Ownership {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
        }
        Ok(entries)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn ensure_group(&self) -> QueueResult<()> {
        self.lock().groups.entry(self.group.clone()).or_default();
        Ok(())
    }

    async fn enqueue(&self, command: &QueueCommand) -> QueueResult<EntryId> {
        let id = self.lock().append(command);
        self.arrivals.notify_waiters();
        Ok(id)
    }

    async fn enqueue_exclusive(&self, command: &QueueCommand) -> QueueResult<EnqueueOutcome> {
        let id = {
            let mut state = self.lock();
            if !state.outstanding.insert(command.external_id().to_string()) {
                return Ok(EnqueueOutcome::AlreadyOutstanding);
            }
            state.append(command)
        };
        self.arrivals.notify_waiters();
        Ok(EnqueueOutcome::Enqueued(id))
    }

    async fn release_outstanding(&self, external_id: &str) -> QueueResult<()> {
        self.lock().outstanding.remove(external_id);
        Ok(())
    }

    async fn is_outstanding(&self, external_id: &str) -> QueueResult<bool> {
        Ok(self.lock().outstanding.contains(external_id))
    }

    async fn dequeue(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<QueueEntry>> {
        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking so an append between the
            // check and the wait still wakes us.
            let arrived = self.arrivals.notified();

            let entries = self.deliver(consumer, count.max(1))?;
            if !entries.is_empty() || block.is_zero() {
                return Ok(entries);
            }

            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, id: &EntryId) -> QueueResult<()> {
        let mut state = self.lock();
        state.group_mut(&self.group)?.pending.remove(id);
        Ok(())
    }

    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        cursor: &EntryId,
        count: usize,
    ) -> QueueResult<ClaimBatch> {
        let mut state = self.lock();
        let now = Instant::now();
        let group = state.group_mut(&self.group)?;

        let mut claimed = Vec::new();
        let mut next_cursor = EntryId::ZERO;
        for (id, owner) in group.pending.range_mut(*cursor..) {
            if claimed.len() >= count.max(1) {
                next_cursor = *id;
                break;
            }
            if now.duration_since(owner.delivered_at) >= min_idle {
                owner.consumer = consumer.to_string();
                owner.delivered_at = now;
                owner.deliveries += 1;
                claimed.push(*id);
            }
        }

        let entries = claimed.iter().filter_map(|id| state.entry(*id)).collect();
        Ok(ClaimBatch {
            next_cursor,
            entries,
        })
    }

    async fn renew(&self, consumer: &str, ids: &[EntryId]) -> QueueResult<usize> {
        let mut state = self.lock();
        let now = Instant::now();
        let group = state.group_mut(&self.group)?;

        let mut renewed = 0;
        for id in ids {
            if let Some(owner) = group.pending.get_mut(id) {
                if owner.consumer == consumer {
                    owner.delivered_at = now;
                    renewed += 1;
                }
            }
        }
        Ok(renewed)
    }

    async fn pending(&self, limit: usize) -> QueueResult<Vec<PendingEntry>> {
        let mut state = self.lock();
        let now = Instant::now();
        let group = state.group_mut(&self.group)?;
        Ok(group
            .pending
            .iter()
            .take(limit)
            .map(|(id, owner)| PendingEntry {
                id: *id,
                consumer: owner.consumer.clone(),
                idle: now.duration_since(owner.delivered_at),
                deliveries: owner.deliveries,
            })
            .collect())
    }
}
