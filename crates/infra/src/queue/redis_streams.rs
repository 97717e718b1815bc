//! Redis Streams-backed queue backend (consumer group, at-least-once).
//!
//! ## Layout
//!
//! - **Stream**: `{prefix}:queue:{job_type}`, one per job type
//! - **Consumer group**: `mediaflow` (created on first use with `MKSTREAM`)
//! - **Consumer**: one name per backend instance
//! - **Retry set**: `{prefix}:queue:{job_type}:retry`, a sorted set of
//!   released entry ids scored by the time they become visible again
//!
//! Leasing tries, in order: released entries whose retry time has come
//! (`XCLAIM`), entries left pending longer than the lease by a consumer that
//! went away (`XAUTOCLAIM`), then new entries (`XREADGROUP ... >`). Acking
//! removes the entry from the group and the stream.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use mediaflow_queue::{Delivery, QueueBackend, QueueError};

const GROUP: &str = "mediaflow";

#[derive(Clone)]
pub struct RedisStreamsQueueBackend {
    connection: redis::aio::MultiplexedConnection,
    prefix: String,
    consumer: String,
    groups: Arc<Mutex<HashSet<String>>>,
}

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq)]
struct StreamEntry {
    id: String,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
}

impl RedisStreamsQueueBackend {
    pub async fn connect(redis_url: impl AsRef<str>, prefix: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::backend(format!("redis connection error: {e}")))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| QueueError::backend(format!("redis connection error: {e}")))?;
        Ok(Self {
            connection,
            prefix: prefix.into(),
            consumer: format!("consumer-{}", Uuid::now_v7()),
            groups: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer
    }

    fn stream_key(&self, job_type: &str) -> String {
        format!("{}:queue:{}", self.prefix, job_type)
    }

    fn retry_key(&self, job_type: &str) -> String {
        format!("{}:queue:{}:retry", self.prefix, job_type)
    }

    fn known_groups(&self) -> MutexGuard<'_, HashSet<String>> {
        self.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ensure the consumer group exists (idempotent).
    async fn ensure_group(&self, stream: &str) -> Result<(), QueueError> {
        if self.known_groups().contains(stream) {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => debug!(stream, group = GROUP, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(QueueError::backend(format!("XGROUP CREATE failed: {e}"))),
        }
        self.known_groups().insert(stream.to_string());
        Ok(())
    }

    async fn lease_from(&self, job_type: &str, lease_for: Duration) -> Result<Option<Delivery>, QueueError> {
        let stream = self.stream_key(job_type);
        self.ensure_group(&stream).await?;

        if let Some(entry) = self.claim_due_retry(job_type, &stream).await? {
            let attempt = self.delivery_count(&stream, &entry.id).await?;
            return Ok(Some(self.delivery(job_type, entry, attempt)));
        }

        if let Some(entry) = self.claim_abandoned(job_type, &stream, lease_for).await? {
            let attempt = self.delivery_count(&stream, &entry.id).await?;
            warn!(stream = %stream, message_id = %entry.id, attempt, "reclaimed entry with expired lease");
            return Ok(Some(self.delivery(job_type, entry, attempt)));
        }

        Ok(self
            .read_new(&stream)
            .await?
            .map(|entry| self.delivery(job_type, entry, 1)))
    }

    fn delivery(&self, job_type: &str, entry: StreamEntry, attempt: u32) -> Delivery {
        Delivery {
            id: entry.id,
            job_type: job_type.to_string(),
            payload: entry.payload,
            attempt: attempt.max(1),
            enqueued_at: entry.enqueued_at,
            lease_token: Uuid::new_v4(),
        }
    }

    async fn claim_due_retry(&self, job_type: &str, stream: &str) -> Result<Option<StreamEntry>, QueueError> {
        let retry_key = self.retry_key(job_type);
        let mut conn = self.connection.clone();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&retry_key)
            .arg("-inf")
            .arg(Utc::now().timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("ZRANGEBYSCORE failed: {e}")))?;

        for id in due {
            // Whoever removes the id from the retry set owns the redelivery.
            let removed: u64 = redis::cmd("ZREM")
                .arg(&retry_key)
                .arg(&id)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::backend(format!("ZREM failed: {e}")))?;
            if removed == 0 {
                continue;
            }

            let claimed: redis::Value = redis::cmd("XCLAIM")
                .arg(stream)
                .arg(GROUP)
                .arg(&self.consumer)
                .arg(0)
                .arg(&id)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::backend(format!("XCLAIM failed: {e}")))?;

            if let Some(entry) = parse_entries(claimed).into_iter().next() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn claim_abandoned(
        &self,
        job_type: &str,
        stream: &str,
        lease_for: Duration,
    ) -> Result<Option<StreamEntry>, QueueError> {
        let mut conn = self.connection.clone();
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(GROUP)
            .arg(&self.consumer)
            .arg(lease_for.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("XAUTOCLAIM failed: {e}")))?;

        // Reply: [next cursor, [entries...], [deleted ids...]]
        let entries = match reply {
            redis::Value::Bulk(mut parts) if parts.len() >= 2 => parse_entries(parts.swap_remove(1)),
            _ => Vec::new(),
        };
        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        let _: u64 = redis::cmd("ZREM")
            .arg(self.retry_key(job_type))
            .arg(&entry.id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("ZREM failed: {e}")))?;
        Ok(Some(entry))
    }

    async fn read_new(&self, stream: &str) -> Result<Option<StreamEntry>, QueueError> {
        let mut conn = self.connection.clone();
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(GROUP)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("XREADGROUP failed: {e}")))?;

        // Reply: [[stream, [entries...]]] or nil when there is nothing new.
        let entries = match reply {
            redis::Value::Bulk(streams) => streams
                .into_iter()
                .filter_map(|s| match s {
                    redis::Value::Bulk(mut pair) if pair.len() == 2 => Some(pair.swap_remove(1)),
                    _ => None,
                })
                .flat_map(parse_entries)
                .collect(),
            _ => Vec::new(),
        };
        Ok(entries.into_iter().next())
    }

    /// How many times the group has delivered entry `id`.
    async fn delivery_count(&self, stream: &str, id: &str) -> Result<u32, QueueError> {
        Ok(self.pending_entry(stream, id).await?.map(|(_, count)| count).unwrap_or(1))
    }

    /// Owner and delivery count of a pending entry.
    async fn pending_entry(&self, stream: &str, id: &str) -> Result<Option<(String, u32)>, QueueError> {
        let mut conn = self.connection.clone();
        let reply: redis::Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(GROUP)
            .arg(id)
            .arg(id)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("XPENDING failed: {e}")))?;
        Ok(parse_pending(reply))
    }

    /// The entry must still be pending for this consumer with the delivery
    /// count it was leased with; otherwise someone else reclaimed it.
    async fn check_owned(&self, stream: &str, delivery: &Delivery) -> Result<(), QueueError> {
        match self.pending_entry(stream, &delivery.id).await? {
            Some((owner, count)) if owner == self.consumer && count == delivery.attempt => Ok(()),
            _ => Err(QueueError::LeaseLost(delivery.id.clone())),
        }
    }
}

#[async_trait::async_trait]
impl QueueBackend for RedisStreamsQueueBackend {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()), err)]
    async fn enqueue(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError> {
        let stream = self.stream_key(job_type);
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .arg("enqueued_at")
            .arg(Utc::now().to_rfc3339())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("XADD failed: {e}")))?;
        Ok(())
    }

    async fn lease(
        &self,
        job_types: &[String],
        lease_for: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        for job_type in job_types {
            if let Some(delivery) = self.lease_from(job_type, lease_for).await? {
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self, delivery), fields(message_id = %delivery.id, job_type = %delivery.job_type), err)]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let stream = self.stream_key(&delivery.job_type);
        self.check_owned(&stream, delivery).await?;

        let mut conn = self.connection.clone();
        let _: u64 = redis::cmd("XACK")
            .arg(&stream)
            .arg(GROUP)
            .arg(&delivery.id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("XACK failed: {e}")))?;
        let _: u64 = redis::cmd("XDEL")
            .arg(&stream)
            .arg(&delivery.id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("XDEL failed: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(message_id = %delivery.id, delay_ms = delay.as_millis() as u64), err)]
    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        let stream = self.stream_key(&delivery.job_type);
        self.check_owned(&stream, delivery).await?;

        let visible_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut conn = self.connection.clone();
        let _: u64 = redis::cmd("ZADD")
            .arg(self.retry_key(&delivery.job_type))
            .arg(visible_at)
            .arg(&delivery.id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::backend(format!("ZADD failed: {e}")))?;
        Ok(())
    }
}

fn text(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(data) => Some(String::from_utf8_lossy(data).into_owned()),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse `[[id, [field, value, ...]], ...]`, skipping entries that were
/// deleted from the stream while still pending (nil fields).
fn parse_entries(value: redis::Value) -> Vec<StreamEntry> {
    let redis::Value::Bulk(entries) = value else {
        return Vec::new();
    };
    entries.into_iter().filter_map(parse_entry).collect()
}

fn parse_entry(value: redis::Value) -> Option<StreamEntry> {
    let redis::Value::Bulk(parts) = value else {
        return None;
    };
    let [id, redis::Value::Bulk(fields)] = parts.as_slice() else {
        return None;
    };
    let id = text(id)?;

    let mut payload = None;
    let mut enqueued_at = None;
    for pair in fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
            match key.as_slice() {
                b"payload" => payload = Some(value.clone()),
                b"enqueued_at" => {
                    enqueued_at = std::str::from_utf8(value)
                        .ok()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|t| t.with_timezone(&Utc))
                }
                _ => {}
            }
        }
    }

    Some(StreamEntry {
        id,
        payload: payload?,
        enqueued_at: enqueued_at.unwrap_or_else(Utc::now),
    })
}

/// Parse `[[id, consumer, idle_ms, delivery_count]]`.
fn parse_pending(value: redis::Value) -> Option<(String, u32)> {
    let redis::Value::Bulk(rows) = value else {
        return None;
    };
    let redis::Value::Bulk(row) = rows.into_iter().next()? else {
        return None;
    };
    match row.as_slice() {
        [_, consumer, _, redis::Value::Int(count)] => Some((text(consumer)?, u32::try_from(*count).ok()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_queue::testing::{drains_each_payload_once, run_queue_backend_contract};
    use redis::Value;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_stream_entries_and_skips_deleted_ones() {
        let reply = Value::Bulk(vec![
            Value::Bulk(vec![
                data("1700000000000-0"),
                Value::Bulk(vec![
                    data("payload"),
                    data("\"abc\""),
                    data("enqueued_at"),
                    data("2024-01-02T03:04:05Z"),
                ]),
            ]),
            Value::Bulk(vec![data("1700000000001-0"), Value::Nil]),
        ]);

        let entries = parse_entries(reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "1700000000000-0");
        assert_eq!(entries[0].payload, b"\"abc\"");
        assert_eq!(entries[0].enqueued_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn parses_pending_owner_and_count() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("1-0"),
            data("consumer-a"),
            Value::Int(1500),
            Value::Int(3),
        ])]);
        assert_eq!(parse_pending(reply), Some(("consumer-a".to_string(), 3)));
        assert_eq!(parse_pending(Value::Bulk(vec![])), None);
    }

    /// Connects to `REDIS_URL` under a fresh prefix; tests return early when it is unset.
    async fn backend() -> Option<RedisStreamsQueueBackend> {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("REDIS_URL not set, skipping redis streams test");
            return None;
        };
        let prefix = format!("mediaflow-test-{}", Uuid::now_v7());
        Some(RedisStreamsQueueBackend::connect(url, prefix).await.expect("connect"))
    }

    #[tokio::test]
    async fn satisfies_backend_contract() {
        let Some(backend) = backend().await else { return };
        run_queue_backend_contract(&backend).await;
    }

    #[tokio::test]
    async fn drains_binary_payloads_once() {
        let Some(backend) = backend().await else { return };
        let payloads = vec![vec![0u8], vec![0xff; 512], b"{\"a\":1}".to_vec()];
        drains_each_payload_once(&backend, &payloads).await;
    }

    #[tokio::test]
    async fn abandoned_entry_is_reclaimed_by_another_consumer() {
        let Some(first_consumer) = backend().await else { return };
        let second_consumer = RedisStreamsQueueBackend {
            consumer: format!("consumer-{}", Uuid::now_v7()),
            ..first_consumer.clone()
        };
        let types = vec!["process".to_string()];
        first_consumer.enqueue("process", b"x").await.unwrap();

        let stale = first_consumer.lease(&types, Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fresh = second_consumer.lease(&types, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(fresh.id, stale.id);
        assert!(matches!(first_consumer.ack(&stale).await, Err(QueueError::LeaseLost(_))));
        second_consumer.ack(&fresh).await.unwrap();
    }
}
