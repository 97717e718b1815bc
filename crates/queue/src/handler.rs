//! Handler registration types.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Message handler: raw payload plus a token cancelled when the delivery is
/// abandoned. Returning `Err` leaves the message for redelivery.
pub type Handler =
    Arc<dyn Fn(Vec<u8>, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a `Handler`.
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<u8>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |payload, token| Box::pin(f(payload, token)))
}
