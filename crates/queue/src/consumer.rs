//! Raw access to a remote work queue.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// One undecoded message pulled off a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    /// Encoded `WorkMessage` JSON.
    pub body: String,
    /// Token handed back to [`QueueConsumer::ack`].
    pub receipt_handle: String,
    /// How many times the provider has delivered this message, 1 on first receipt.
    pub attempt_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub connected: bool,
    /// Backlog reported by the provider, when it exposes one.
    pub approximate_message_count: Option<u64>,
    pub provider: String,
}

impl QueueHealth {
    pub fn connected(provider: impl Into<String>) -> Self {
        Self {
            connected: true,
            approximate_message_count: None,
            provider: provider.into(),
        }
    }
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.approximate_message_count {
            Some(n) => write!(f, "{} (connected: {}, backlog: {n})", self.provider, self.connected),
            None => write!(f, "{} (connected: {})", self.provider, self.connected),
        }
    }
}

/// Batch receive and delete against a queue provider.
///
/// Implementations only move raw messages; decoding and dispatch happen in
/// [`QueueBackend`](crate::queue_backend::QueueBackend).
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    fn provider(&self) -> &str;

    /// Called once by `Backend::start` before the first receive.
    async fn connect(&self) -> Result<(), QueueError> {
        Ok(())
    }

    /// Receive at most `max_messages`. An empty vec means the queue had
    /// nothing before the provider's wait time ran out.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete a message so it is not redelivered.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<QueueHealth, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_survives_json() {
        let msg = QueueMessage {
            id: "m-1".to_string(),
            body: r#"{"method":"reindex","params":{"id":7}}"#.to_string(),
            receipt_handle: "rh-1".to_string(),
            attempt_count: 2,
        };

        let back: QueueMessage = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(back.body, msg.body);
        assert_eq!(back.attempt_count, 2);
    }

    #[test]
    fn health_display_includes_backlog_when_known() {
        let mut health = QueueHealth::connected("sqs");
        assert_eq!(health.to_string(), "sqs (connected: true)");

        health.approximate_message_count = Some(42);
        assert_eq!(health.to_string(), "sqs (connected: true, backlog: 42)");
    }
}
