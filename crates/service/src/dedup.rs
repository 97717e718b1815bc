//! Per-key serialized execution.
//!
//! Each active key owns an unbounded task queue drained by one worker task.
//! Tasks for the same key run one at a time in submission order; different
//! keys run independently.
//!
//! The registry mutex is held only to look up, insert, or remove a key's
//! queue and to enqueue into it, never while a task runs. A worker that finds
//! its queue empty re-checks under the mutex before removing the key, and
//! submitters only enqueue under the mutex, so a task can never be left in a
//! queue whose worker has exited.
//!
//! A task must not submit to its own key and wait for the result: it would
//! queue behind itself forever.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::DedupError;

type Task = BoxFuture<'static, ()>;
type Registry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Task>>>>;

#[derive(Clone, Default)]
pub struct KeyedExecutor {
    queues: Registry,
}

impl KeyedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after every previously submitted task for `key` has finished.
    ///
    /// Dropping the returned future (or wrapping it in a timeout) only stops
    /// waiting: the task still runs to completion. Must be called from within
    /// a tokio runtime.
    pub async fn run<F, T>(&self, key: &str, task: F) -> Result<T, DedupError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Task = Box::pin(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let _ = tx.send(outcome.map_err(|panic| panic_message(panic.as_ref())));
        });
        self.submit(key, wrapped);

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(DedupError::Panicked {
                key: key.to_string(),
                message,
            }),
            Err(_) => Err(DedupError::Dropped(key.to_string())),
        }
    }

    /// Number of keys with a live worker.
    pub fn active_keys(&self) -> usize {
        lock(&self.queues).len()
    }

    fn submit(&self, key: &str, task: Task) {
        let mut queues = lock(&self.queues);

        let task = match queues.get(key) {
            Some(sender) => match sender.send(task) {
                Ok(()) => return,
                // Worker is gone without deregistering (runtime shutting down); replace it.
                Err(mpsc::error::SendError(task)) => task,
            },
            None => task,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(task).is_err() {
            return;
        }
        queues.insert(key.to_string(), sender);
        debug!(key, "keyed worker started");
        tokio::spawn(drain(self.queues.clone(), key.to_string(), receiver));
    }
}

async fn drain(queues: Registry, key: String, mut receiver: mpsc::UnboundedReceiver<Task>) {
    loop {
        let next = match receiver.try_recv() {
            Ok(task) => Some(task),
            Err(_) => {
                let mut registry = lock(&queues);
                match receiver.try_recv() {
                    Ok(task) => Some(task),
                    Err(_) => {
                        registry.remove(&key);
                        None
                    }
                }
            }
        };

        match next {
            Some(task) => task.await,
            None => break,
        }
    }
    debug!(key = %key, "keyed worker stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        error!("keyed executor registry lock poisoned; recovering");
        poisoned.into_inner()
    })
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
