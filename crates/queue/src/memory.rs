//! In-memory queue backend for tests/dev.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backend::{Delivery, QueueBackend};
use crate::error::QueueError;

#[derive(Debug)]
struct StoredMessage {
    job_type: String,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
    attempts: u32,
    lease_token: Option<Uuid>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    messages: BTreeMap<u64, StoredMessage>,
}

/// Process-local backend with the same lease/ack/release semantics as the
/// durable ones. Messages are leased oldest first.
#[derive(Debug, Default)]
pub struct InMemoryQueueBackend {
    state: Mutex<State>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of messages not yet acked (leased or not).
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payloads of all unacked messages for `job_type`, oldest first.
    pub fn payloads(&self, job_type: &str) -> Vec<Vec<u8>> {
        self.lock()
            .messages
            .values()
            .filter(|m| m.job_type == job_type)
            .map(|m| m.payload.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_id(delivery: &Delivery) -> Result<u64, QueueError> {
    delivery
        .id
        .parse()
        .map_err(|_| QueueError::backend(format!("malformed message id: {}", delivery.id)))
}

#[async_trait::async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn enqueue(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError> {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.messages.insert(
            id,
            StoredMessage {
                job_type: job_type.to_string(),
                payload: payload.to_vec(),
                enqueued_at: Utc::now(),
                visible_at: Instant::now(),
                attempts: 0,
                lease_token: None,
            },
        );
        Ok(())
    }

    async fn lease(
        &self,
        job_types: &[String],
        lease_for: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();

        let next = state
            .messages
            .iter_mut()
            .find(|(_, m)| m.visible_at <= now && job_types.iter().any(|t| *t == m.job_type));

        let Some((id, message)) = next else {
            return Ok(None);
        };

        let token = Uuid::new_v4();
        message.visible_at = now + lease_for;
        message.attempts += 1;
        message.lease_token = Some(token);

        Ok(Some(Delivery {
            id: id.to_string(),
            job_type: message.job_type.clone(),
            payload: message.payload.clone(),
            attempt: message.attempts,
            enqueued_at: message.enqueued_at,
            lease_token: token,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let id = parse_id(delivery)?;
        let mut state = self.lock();
        let owned = state
            .messages
            .get(&id)
            .is_some_and(|m| m.lease_token == Some(delivery.lease_token));
        if !owned {
            return Err(QueueError::LeaseLost(delivery.id.clone()));
        }
        state.messages.remove(&id);
        Ok(())
    }

    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        let id = parse_id(delivery)?;
        let mut state = self.lock();
        match state.messages.get_mut(&id) {
            Some(m) if m.lease_token == Some(delivery.lease_token) => {
                m.visible_at = Instant::now() + delay;
                m.lease_token = None;
                Ok(())
            }
            _ => Err(QueueError::LeaseLost(delivery.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use proptest::prelude::*;

    #[tokio::test]
    async fn satisfies_backend_contract() {
        testing::run_queue_backend_contract(&InMemoryQueueBackend::new()).await;
    }

    #[tokio::test]
    async fn payloads_lists_unacked_messages_per_type() {
        let backend = InMemoryQueueBackend::new();
        backend.enqueue("other", b"o").await.unwrap();
        backend.enqueue("process", b"1").await.unwrap();

        let leased = backend
            .lease(&["process".to_string()], Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backend.payloads("process"), vec![b"1".to_vec()]);
        assert_eq!(backend.len(), 2);

        backend.ack(&leased).await.unwrap();
        assert!(backend.payloads("process").is_empty());
        assert_eq!(backend.payloads("other"), vec![b"o".to_vec()]);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn every_payload_is_delivered_once(payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..16)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            runtime.block_on(testing::drains_each_payload_once(&InMemoryQueueBackend::new(), &payloads));
        }
    }
}
