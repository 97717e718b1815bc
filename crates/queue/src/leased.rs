//! Delivery pool that drives any `QueueBackend`.
//!
//! One dispatcher task leases messages while a permit is free, and spawns a
//! delivery task per message. Delivery outcomes:
//!
//! - handler `Ok` → ack
//! - handler `Err` → release after `redelivery_delay`
//! - `max_execution_time` elapsed → cancel the handler's token, give the
//!   handler `cancel_grace` to wind down, drop it, release
//! - handler panic → logged with full context and re-raised out of the
//!   delivery task; the dispatcher reaps it and keeps serving. The message
//!   stays leased and comes back when its lease runs out.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::JobQueue;
use crate::backend::{Delivery, QueueBackend};
use crate::error::QueueError;
use crate::handler::Handler;

/// How many payload bytes to include in failure logs.
const PAYLOAD_PREVIEW_BYTES: usize = 128;

/// Delivery pool configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long to sleep when no message is visible
    pub poll_interval: Duration,
    /// Lease length; a handler running longer is abandoned
    pub max_execution_time: Duration,
    /// Maximum concurrent handler invocations
    pub concurrency: usize,
    /// Delay before a failed message becomes visible again
    pub redelivery_delay: Duration,
    /// How long a timed-out handler may keep running after its token is cancelled
    pub cancel_grace: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_execution_time: Duration::from_secs(8 * 60 * 60),
            concurrency: 4,
            redelivery_delay: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(5),
            name: "job-queue".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_execution_time(mut self, max: Duration) -> Self {
        self.max_execution_time = max;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub delivered: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub abandoned: u64,
    pub in_flight: usize,
}

struct Shared<B> {
    backend: B,
    config: QueueConfig,
    handlers: RwLock<HashMap<String, Handler>>,
    stats: Mutex<QueueStats>,
    wakeup: Notify,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    started: Mutex<bool>,
}

/// `JobQueue` over a leasing backend.
pub struct LeasedQueue<B: QueueBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: QueueBackend> Clone for LeasedQueue<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<B: QueueBackend> LeasedQueue<B> {
    pub fn new(backend: B, config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                handlers: RwLock::new(HashMap::new()),
                stats: Mutex::new(QueueStats::default()),
                wakeup: Notify::new(),
                shutdown: CancellationToken::new(),
                dispatcher: Mutex::new(None),
                started: Mutex::new(false),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> QueueStats {
        lock(&self.shared.stats).clone()
    }
}

#[async_trait::async_trait]
impl<B: QueueBackend> JobQueue for LeasedQueue<B> {
    async fn publish(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError> {
        validate_job_type(job_type)?;
        self.shared.backend.enqueue(job_type, payload).await?;
        debug!(queue = %self.shared.config.name, job_type, bytes = payload.len(), "message published");
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn subscribe(&self, job_type: &str, handler: Handler) -> Result<(), QueueError> {
        validate_job_type(job_type)?;
        let mut handlers = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(job_type.to_string(), handler).is_some() {
            warn!(queue = %self.shared.config.name, job_type, "handler replaced");
        }
        drop(handlers);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    fn run(&self) -> Result<(), QueueError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(QueueError::ShutDown);
        }
        let mut started = lock(&self.shared.started);
        if *started {
            return Err(QueueError::AlreadyRunning);
        }
        *started = true;

        let handle = tokio::spawn(dispatch_loop(self.shared.clone()));
        *lock(&self.shared.dispatcher) = Some(handle);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handle = lock(&self.shared.dispatcher).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(queue = %self.shared.config.name, error = %e, "dispatcher terminated abnormally");
            }
        }
    }
}

fn validate_job_type(job_type: &str) -> Result<(), QueueError> {
    if job_type.trim().is_empty() {
        return Err(QueueError::InvalidJobType(job_type.to_string()));
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<B: QueueBackend> Shared<B> {
    fn job_types(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn handler_for(&self, job_type: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(job_type)
            .cloned()
    }

    fn record(&self, f: impl FnOnce(&mut QueueStats)) {
        f(&mut lock(&self.stats));
    }

    /// Sleep for the poll interval, waking early on publish/subscribe or shutdown.
    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.wakeup.notified() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    fn reap(&self, result: Result<(), JoinError>) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                self.record(|s| s.panicked += 1);
                error!(queue = %self.config.name, "delivery task panicked");
            }
            Err(e) => {
                warn!(queue = %self.config.name, error = %e, "delivery task cancelled");
            }
        }
    }
}

async fn dispatch_loop<B: QueueBackend>(shared: Arc<Shared<B>>) {
    let name = shared.config.name.clone();
    info!(queue = %name, concurrency = shared.config.concurrency, "job queue started");

    let permits = Arc::new(Semaphore::new(shared.config.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        while let Some(result) = tasks.try_join_next() {
            shared.reap(result);
        }

        let permit = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job_types = shared.job_types();
        if job_types.is_empty() {
            drop(permit);
            shared.idle().await;
            continue;
        }

        match shared
            .backend
            .lease(&job_types, shared.config.max_execution_time)
            .await
        {
            Ok(Some(delivery)) => {
                shared.record(|s| s.delivered += 1);
                let shared = shared.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    deliver(shared, delivery).await;
                });
            }
            Ok(None) => {
                drop(permit);
                shared.idle().await;
            }
            Err(e) => {
                drop(permit);
                error!(queue = %name, error = %e, "failed to lease message");
                shared.idle().await;
            }
        }
    }

    info!(queue = %name, in_flight = tasks.len(), "job queue draining");
    while let Some(result) = tasks.join_next().await {
        shared.reap(result);
    }
    info!(queue = %name, "job queue stopped");
}

/// Decrements the in-flight gauge even when the handler unwinds.
struct InFlight<'a, B: QueueBackend>(&'a Shared<B>);

impl<'a, B: QueueBackend> InFlight<'a, B> {
    fn enter(shared: &'a Shared<B>) -> Self {
        shared.record(|s| s.in_flight += 1);
        Self(shared)
    }
}

impl<B: QueueBackend> Drop for InFlight<'_, B> {
    fn drop(&mut self) {
        self.0.record(|s| s.in_flight = s.in_flight.saturating_sub(1));
    }
}

async fn deliver<B: QueueBackend>(shared: Arc<Shared<B>>, delivery: Delivery) {
    let name = &shared.config.name;

    let Some(handler) = shared.handler_for(&delivery.job_type) else {
        warn!(queue = %name, job_type = %delivery.job_type, message_id = %delivery.id, "no handler for job type");
        release(&shared, &delivery, shared.config.redelivery_delay).await;
        return;
    };

    let token = CancellationToken::new();
    let started = Instant::now();
    let outcome = {
        let _in_flight = InFlight::enter(&shared);
        let run = async {
            let mut work = handler(delivery.payload.clone(), token.clone());
            let result = tokio::time::timeout(shared.config.max_execution_time, &mut work).await;
            if result.is_err() {
                token.cancel();
                match tokio::time::timeout(shared.config.cancel_grace, &mut work).await {
                    Ok(_) => debug!(queue = %name, message_id = %delivery.id, "handler stopped after cancellation"),
                    Err(_) => warn!(
                        queue = %name,
                        message_id = %delivery.id,
                        grace_ms = shared.config.cancel_grace.as_millis() as u64,
                        "handler ignored cancellation; dropping it"
                    ),
                }
            }
            result
        };
        AssertUnwindSafe(run).catch_unwind().await
    };

    match outcome {
        Ok(Ok(Ok(()))) => {
            shared.record(|s| s.succeeded += 1);
            debug!(
                queue = %name,
                job_type = %delivery.job_type,
                message_id = %delivery.id,
                attempt = delivery.attempt,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "message handled"
            );
            if let Err(e) = shared.backend.ack(&delivery).await {
                error!(queue = %name, message_id = %delivery.id, error = %e, "failed to ack message");
            }
        }
        Ok(Ok(Err(e))) => {
            shared.record(|s| s.failed += 1);
            let error = format!("{e:#}");
            warn!(
                queue = %name,
                job_type = %delivery.job_type,
                message_id = %delivery.id,
                attempt = delivery.attempt,
                error = %error,
                "handler failed; message left for redelivery"
            );
            release(&shared, &delivery, shared.config.redelivery_delay).await;
        }
        Ok(Err(_elapsed)) => {
            shared.record(|s| s.abandoned += 1);
            warn!(
                queue = %name,
                job_type = %delivery.job_type,
                message_id = %delivery.id,
                attempt = delivery.attempt,
                max_execution_secs = shared.config.max_execution_time.as_secs(),
                "handler exceeded max execution time; message abandoned"
            );
            release(&shared, &delivery, Duration::ZERO).await;
        }
        Err(panic) => {
            token.cancel();
            error!(
                queue = %name,
                job_type = %delivery.job_type,
                message_id = %delivery.id,
                attempt = delivery.attempt,
                enqueued_at = %delivery.enqueued_at,
                payload = %payload_preview(&delivery.payload),
                panic = %panic_message(panic.as_ref()),
                "handler panicked"
            );
            std::panic::resume_unwind(panic);
        }
    }
}

async fn release<B: QueueBackend>(shared: &Shared<B>, delivery: &Delivery, delay: Duration) {
    if let Err(e) = shared.backend.release(delivery, delay).await {
        error!(
            queue = %shared.config.name,
            message_id = %delivery.id,
            error = %e,
            "failed to release message; it will be redelivered when its lease expires"
        );
    }
}

fn payload_preview(payload: &[u8]) -> String {
    let end = payload.len().min(PAYLOAD_PREVIEW_BYTES);
    let mut preview = String::from_utf8_lossy(&payload[..end]).into_owned();
    if payload.len() > end {
        preview.push_str("...");
    }
    preview
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
