//! Redis Streams backend.
//!
//! - `XADD` appends, `XREADGROUP` delivers, `XACK` acknowledges.
//! - `XAUTOCLAIM` drives recovery; an ownership-checked `XCLAIM` renews.
//! - The per-job outstanding marker is a plain key written by the same Lua
//!   script that appends, so the check and the append cannot interleave
//!   with another caller.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, Script, Value};
use scribe_core::naming::outstanding_key;
use tokio::sync::Mutex;

use crate::entry::{EntryId, QueueCommand, QueueEntry};
use crate::error::{QueueError, QueueResult};
use crate::{ClaimBatch, EnqueueOutcome, PendingEntry, QueueConfig, WorkQueue};

/// KEYS[1] stream, KEYS[2] marker; ARGV flat field/value pairs.
const ENQUEUE_EXCLUSIVE_LUA: &str = r"
if not redis.call('SET', KEYS[2], 'reserved', 'NX') then
  return false
end
local id = redis.call('XADD', KEYS[1], '*', unpack(ARGV))
redis.call('SET', KEYS[2], id)
return id
";

/// KEYS[1] stream; ARGV[1] group, ARGV[2] consumer, ARGV[3..] entry ids.
const RENEW_LUA: &str = r"
local renewed = 0
for i = 3, #ARGV do
  local p = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[i], ARGV[i], 1)
  if p[1] and p[1][2] == ARGV[2] then
    redis.call('XCLAIM', KEYS[1], ARGV[1], ARGV[2], 0, ARGV[i], 'JUSTID')
    renewed = renewed + 1
  end
end
return renewed
";

pub struct RedisStreamQueue {
    config: QueueConfig,
    connection: MultiplexedConnection,
    /// Blocking reads stall every command queued behind them on a
    /// multiplexed connection, so they get their own.
    blocking: Mutex<MultiplexedConnection>,
    enqueue_script: Script,
    renew_script: Script,
}

impl RedisStreamQueue {
    pub async fn connect(config: QueueConfig) -> QueueResult<Self> {
        let connection_failed = |e: redis::RedisError| QueueError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        };

        let client = Client::open(config.url.as_str()).map_err(connection_failed)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_failed)?;
        let blocking = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_failed)?;

        Ok(Self {
            config,
            connection,
            blocking: Mutex::new(blocking),
            enqueue_script: Script::new(ENQUEUE_EXCLUSIVE_LUA),
            renew_script: Script::new(RENEW_LUA),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn entry_from_fields(id: &str, fields: HashMap<String, String>) -> QueueResult<QueueEntry> {
    Ok(QueueEntry {
        id: id.parse()?,
        fields: fields.into_iter().collect::<BTreeMap<_, _>>(),
    })
}

/// Parse an `XAUTOCLAIM` reply: `[cursor, [entry | nil ...], [deleted ...]?]`.
fn parse_autoclaim(reply: Vec<Value>) -> QueueResult<ClaimBatch> {
    let mut parts = reply.into_iter();
    let cursor: String = match parts.next() {
        Some(v) => redis::from_redis_value(&v)?,
        None => return Err(QueueError::Protocol("empty XAUTOCLAIM reply".into())),
    };

    let raw_entries = match parts.next() {
        Some(Value::Array(items)) => items,
        Some(Value::Nil) | None => Vec::new(),
        Some(other) => {
            return Err(QueueError::Protocol(format!(
                "unexpected XAUTOCLAIM entries: {other:?}"
            )))
        }
    };

    let mut entries = Vec::with_capacity(raw_entries.len());
    for item in raw_entries {
        // Entries deleted from the stream but still pending come back as nil.
        if matches!(item, Value::Nil) {
            continue;
        }
        let (id, fields): (String, HashMap<String, String>) = redis::from_redis_value(&item)?;
        entries.push(entry_from_fields(&id, fields)?);
    }

    Ok(ClaimBatch {
        next_cursor: cursor.parse()?,
        entries,
    })
}

#[async_trait]
impl WorkQueue for RedisStreamQueue {
    async fn ensure_group(&self) -> QueueResult<()> {
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn())
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    stream = %self.config.stream_key,
                    group = %self.config.group,
                    "Created consumer group",
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn enqueue(&self, command: &QueueCommand) -> QueueResult<EntryId> {
        let id: String = self
            .conn()
            .xadd(&self.config.stream_key, "*", &command.to_fields())
            .await?;
        id.parse()
    }

    async fn enqueue_exclusive(&self, command: &QueueCommand) -> QueueResult<EnqueueOutcome> {
        let mut invocation = self.enqueue_script.prepare_invoke();
        invocation
            .key(&self.config.stream_key)
            .key(outstanding_key(command.external_id()));
        for (field, value) in command.to_fields() {
            invocation.arg(field).arg(value);
        }

        let id: Option<String> = invocation.invoke_async(&mut self.conn()).await?;
        match id {
            Some(id) => Ok(EnqueueOutcome::Enqueued(id.parse()?)),
            None => Ok(EnqueueOutcome::AlreadyOutstanding),
        }
    }

    async fn release_outstanding(&self, external_id: &str) -> QueueResult<()> {
        self.conn()
            .del::<_, ()>(outstanding_key(external_id))
            .await?;
        Ok(())
    }

    async fn is_outstanding(&self, external_id: &str) -> QueueResult<bool> {
        Ok(self.conn().exists(outstanding_key(external_id)).await?)
    }

    async fn dequeue(
        &self,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<QueueEntry>> {
        let mut opts = StreamReadOptions::default()
            .group(&self.config.group, consumer)
            .count(count.max(1));
        if !block.is_zero() {
            opts = opts.block(block.as_millis() as usize);
        }

        let mut conn = self.blocking.lock().await;
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream_key], &[">"], &opts)
            .await?;

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for stream_id in key.ids {
                let mut fields = BTreeMap::new();
                for (field, value) in stream_id.map {
                    let value: String = redis::from_redis_value(&value)?;
                    fields.insert(field, value);
                }
                entries.push(QueueEntry {
                    id: stream_id.id.parse()?,
                    fields,
                });
            }
        }
        Ok(entries)
    }

    async fn acknowledge(&self, id: &EntryId) -> QueueResult<()> {
        self.conn()
            .xack::<_, _, _, ()>(&self.config.stream_key, &self.config.group, &[id.to_string()])
            .await?;
        Ok(())
    }

    async fn claim_idle(
        &self,
        consumer: &str,
        min_idle: Duration,
        cursor: &EntryId,
        count: usize,
    ) -> QueueResult<ClaimBatch> {
        let reply: Vec<Value> = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(cursor.to_string())
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut self.conn())
            .await?;
        parse_autoclaim(reply)
    }

    async fn renew(&self, consumer: &str, ids: &[EntryId]) -> QueueResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut invocation = self.renew_script.prepare_invoke();
        invocation
            .key(&self.config.stream_key)
            .arg(&self.config.group)
            .arg(consumer);
        for id in ids {
            invocation.arg(id.to_string());
        }
        let renewed: usize = invocation.invoke_async(&mut self.conn()).await?;
        Ok(renewed)
    }

    async fn pending(&self, limit: usize) -> QueueResult<Vec<PendingEntry>> {
        let rows: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.config.stream_key)
            .arg(&self.config.group)
            .arg("-")
            .arg("+")
            .arg(limit.max(1))
            .query_async(&mut self.conn())
            .await?;

        rows.into_iter()
            .map(|(id, consumer, idle_ms, deliveries)| {
                Ok(PendingEntry {
                    id: id.parse()?,
                    consumer,
                    idle: Duration::from_millis(idle_ms),
                    deliveries,
                })
            })
            .collect()
    }
}
