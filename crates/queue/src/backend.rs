//! The poll contract the worker pool drives, plus the producer-side seam.

use std::sync::Arc;

use async_trait::async_trait;
use drudge_core::WorkMessage;

use crate::consumer::QueueHealth;
use crate::error::QueueError;
use crate::metrics::BackendMetrics;

/// A source of work messages polled by a worker pool.
///
/// `poll` retrieves and fully processes at most one batch. It returns
/// `Ok(true)` when at least one message was found, whatever the handler
/// outcomes were, and `Ok(false)` when nothing was available. Per-message
/// failures are logged and counted inside the backend; only transport-level
/// failures escape as `Err`. `poll` may be called from many loops at once
/// and must not block indefinitely.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short identifier used in logs and health output.
    fn name(&self) -> &str;

    /// Connect / resolve resources. A failure here aborts pool start.
    async fn start(&self) -> Result<(), QueueError>;

    /// Release resources. Best effort; the caller bounds how long it waits.
    async fn stop(&self) -> Result<(), QueueError>;

    async fn poll(&self) -> Result<bool, QueueError>;

    fn metrics(&self) -> Option<Arc<BackendMetrics>> {
        None
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Ok(QueueHealth::connected(self.name()))
    }
}

/// Blanket implementation so `Arc<dyn Backend>` can be used directly.
#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn start(&self) -> Result<(), QueueError> {
        (**self).start().await
    }

    async fn stop(&self) -> Result<(), QueueError> {
        (**self).stop().await
    }

    async fn poll(&self) -> Result<bool, QueueError> {
        (**self).poll().await
    }

    fn metrics(&self) -> Option<Arc<BackendMetrics>> {
        (**self).metrics()
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        (**self).health_check().await
    }
}

/// Enqueues work messages for some backend to pick up.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, message: &WorkMessage) -> Result<(), QueueError>;
}

#[async_trait]
impl<T: Sender + ?Sized> Sender for Arc<T> {
    async fn send(&self, message: &WorkMessage) -> Result<(), QueueError> {
        (**self).send(message).await
    }
}
