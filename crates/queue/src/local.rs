//! In-process backend backed by a FIFO queue.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use drudge_core::{WorkMessage, WorkMethods};
use tracing::{debug, warn};

use crate::backend::{Backend, Sender};
use crate::consumer::QueueHealth;
use crate::dispatch::Dispatcher;
use crate::error::QueueError;
use crate::metrics::BackendMetrics;

/// In-memory backend for development and tests.
///
/// Each poll pops and dispatches a single message.
pub struct LocalBackend {
    queue: Mutex<VecDeque<WorkMessage>>,
    dispatcher: Dispatcher,
}

impl LocalBackend {
    pub fn new(methods: Arc<WorkMethods>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            dispatcher: Dispatcher::new(methods, Arc::new(BackendMetrics::new())),
        }
    }

    /// Enqueue a message for a later poll.
    pub fn submit(&self, message: WorkMessage) {
        debug!(method = %message.method(), "Queued local message");
        self.queue().push_back(message);
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<WorkMessage>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn start(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn poll(&self) -> Result<bool, QueueError> {
        // Guard is dropped before the handler runs.
        let next = self.queue().pop_front();
        let Some(message) = next else {
            return Ok(false);
        };

        self.dispatcher.metrics().record_received(1);
        if let Err(e) = self.dispatcher.dispatch(&message).await {
            warn!(method = %message.method(), error = %e, "Local work message failed");
        }
        Ok(true)
    }

    fn metrics(&self) -> Option<Arc<BackendMetrics>> {
        Some(self.dispatcher.metrics().clone())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Ok(QueueHealth {
            approximate_message_count: Some(self.len() as u64),
            ..QueueHealth::connected(self.name())
        })
    }
}

#[async_trait]
impl Sender for LocalBackend {
    async fn send(&self, message: &WorkMessage) -> Result<(), QueueError> {
        self.submit(message.clone());
        Ok(())
    }
}
