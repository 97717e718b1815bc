//! Behaviour every `QueueBackend` must share.
//!
//! Each check uses its own freshly generated job types, so a durable
//! backend can be exercised repeatedly against the same database or Redis.

use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

use crate::backend::QueueBackend;
use crate::error::QueueError;

const LONG_LEASE: Duration = Duration::from_secs(60);

fn unique_type(label: &str) -> String {
    format!("contract-{label}-{}", Uuid::now_v7().simple())
}

/// Run every contract check against `backend`.
pub async fn run_queue_backend_contract<B: QueueBackend>(backend: &B) {
    leased_message_is_hidden_until_released(backend).await;
    released_message_comes_back_with_next_attempt(backend).await;
    expired_lease_is_redelivered_and_stale_lease_is_lost(backend).await;
    delayed_release_stays_hidden(backend).await;
    lease_only_returns_requested_types(backend).await;
    messages_are_leased_oldest_first(backend).await;
}

pub async fn leased_message_is_hidden_until_released<B: QueueBackend>(backend: &B) {
    let job_type = unique_type("hidden");
    let types = vec![job_type.clone()];
    backend.enqueue(&job_type, b"\"abc\"").await.unwrap();

    let delivery = backend.lease(&types, LONG_LEASE).await.unwrap().expect("message should be leased");
    assert_eq!(delivery.job_type, job_type);
    assert_eq!(delivery.payload, b"\"abc\"");
    assert_eq!(delivery.attempt, 1);
    assert!(backend.lease(&types, LONG_LEASE).await.unwrap().is_none());

    backend.ack(&delivery).await.unwrap();
    assert!(backend.lease(&types, Duration::ZERO).await.unwrap().is_none());
}

pub async fn released_message_comes_back_with_next_attempt<B: QueueBackend>(backend: &B) {
    let job_type = unique_type("release");
    let types = vec![job_type.clone()];
    backend.enqueue(&job_type, b"x").await.unwrap();

    let first = backend.lease(&types, LONG_LEASE).await.unwrap().unwrap();
    backend.release(&first, Duration::ZERO).await.unwrap();

    let second = backend.lease(&types, LONG_LEASE).await.unwrap().expect("released message should return");
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt, 2);
    assert_eq!(second.payload, first.payload);

    assert!(matches!(backend.ack(&first).await, Err(QueueError::LeaseLost(_))));
    backend.ack(&second).await.unwrap();
    assert!(matches!(backend.release(&second, Duration::ZERO).await, Err(QueueError::LeaseLost(_))));
}

pub async fn expired_lease_is_redelivered_and_stale_lease_is_lost<B: QueueBackend>(backend: &B) {
    let job_type = unique_type("expired");
    let types = vec![job_type.clone()];
    backend.enqueue(&job_type, b"x").await.unwrap();

    let stale = backend.lease(&types, Duration::ZERO).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let fresh = backend
        .lease(&types, Duration::ZERO)
        .await
        .unwrap()
        .expect("expired lease should be redelivered");
    assert_eq!(fresh.id, stale.id);
    assert!(fresh.attempt > stale.attempt);

    assert!(matches!(backend.release(&stale, Duration::ZERO).await, Err(QueueError::LeaseLost(_))));
    assert!(matches!(backend.ack(&stale).await, Err(QueueError::LeaseLost(_))));
    backend.ack(&fresh).await.unwrap();
}

pub async fn delayed_release_stays_hidden<B: QueueBackend>(backend: &B) {
    let job_type = unique_type("delayed");
    let types = vec![job_type.clone()];
    backend.enqueue(&job_type, b"x").await.unwrap();

    let delivery = backend.lease(&types, LONG_LEASE).await.unwrap().unwrap();
    backend.release(&delivery, Duration::from_secs(3600)).await.unwrap();
    assert!(backend.lease(&types, LONG_LEASE).await.unwrap().is_none());
}

pub async fn lease_only_returns_requested_types<B: QueueBackend>(backend: &B) {
    let wanted = unique_type("wanted");
    let other = unique_type("other");
    backend.enqueue(&other, b"o").await.unwrap();

    assert!(backend.lease(&[wanted.clone()], LONG_LEASE).await.unwrap().is_none());

    backend.enqueue(&wanted, b"w").await.unwrap();
    let delivery = backend.lease(&[wanted.clone(), other.clone()], LONG_LEASE).await.unwrap().unwrap();
    let second = backend.lease(&[wanted.clone(), other.clone()], LONG_LEASE).await.unwrap().unwrap();
    let seen: HashSet<_> = [delivery.payload.clone(), second.payload.clone()].into_iter().collect();
    assert_eq!(seen, HashSet::from([b"o".to_vec(), b"w".to_vec()]));

    backend.ack(&delivery).await.unwrap();
    backend.ack(&second).await.unwrap();
}

pub async fn messages_are_leased_oldest_first<B: QueueBackend>(backend: &B) {
    let job_type = unique_type("fifo");
    let types = vec![job_type.clone()];
    for payload in [b"1", b"2", b"3"] {
        backend.enqueue(&job_type, payload).await.unwrap();
    }

    let mut order = Vec::new();
    while let Some(delivery) = backend.lease(&types, LONG_LEASE).await.unwrap() {
        order.push(delivery.payload.clone());
        backend.ack(&delivery).await.unwrap();
    }
    assert_eq!(order, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
}

/// Every payload is delivered exactly once when each delivery is acked.
///
/// Shared property: callers drive it with generated payload lists.
pub async fn drains_each_payload_once<B: QueueBackend>(backend: &B, payloads: &[Vec<u8>]) {
    let job_type = unique_type("drain");
    let types = vec![job_type.clone()];
    for payload in payloads {
        backend.enqueue(&job_type, payload).await.unwrap();
    }

    let mut delivered = Vec::new();
    let mut ids = HashSet::new();
    while let Some(delivery) = backend.lease(&types, LONG_LEASE).await.unwrap() {
        assert!(ids.insert(delivery.id.clone()), "message {} delivered twice", delivery.id);
        assert_eq!(delivery.attempt, 1);
        delivered.push(delivery.payload.clone());
        backend.ack(&delivery).await.unwrap();
    }
    assert_eq!(delivered, payloads);
}
