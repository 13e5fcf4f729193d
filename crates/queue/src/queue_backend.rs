//! Generic cloud-queue backend on top of a [`QueueConsumer`].

use std::sync::Arc;

use async_trait::async_trait;
use drudge_core::{AckPolicy, MessageCodec, WorkMethods};
use tracing::{debug, info, instrument, warn};

use crate::backend::Backend;
use crate::consumer::{QueueConsumer, QueueHealth};
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::QueueError;
use crate::metrics::BackendMetrics;
use crate::parser::parse_batch;

/// Polls a remote queue in batches, dispatches each message and deletes
/// it according to the configured [`AckPolicy`].
///
/// Messages whose handler failed, or whose body could not be decoded, are
/// never acknowledged and will be redelivered by the provider.
pub struct QueueBackend<C> {
    consumer: C,
    codec: MessageCodec,
    dispatcher: Dispatcher,
    ack_policy: AckPolicy,
    max_messages: u32,
}

impl<C: QueueConsumer> QueueBackend<C> {
    pub fn new(consumer: C, methods: Arc<WorkMethods>, codec: MessageCodec) -> Self {
        Self {
            consumer,
            codec,
            dispatcher: Dispatcher::new(methods, Arc::new(BackendMetrics::new())),
            ack_policy: AckPolicy::default(),
            max_messages: 10,
        }
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max.max(1);
        self
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    fn should_ack(&self, outcome: Outcome) -> bool {
        match self.ack_policy {
            AckPolicy::Always => true,
            AckPolicy::Handled => outcome.is_handled(),
        }
    }
}

#[async_trait]
impl<C: QueueConsumer> Backend for QueueBackend<C> {
    fn name(&self) -> &str {
        self.consumer.provider()
    }

    #[instrument(skip_all, fields(provider = %self.consumer.provider()))]
    async fn start(&self) -> Result<(), QueueError> {
        self.consumer.connect().await?;
        info!(ack_policy = ?self.ack_policy, max_messages = self.max_messages, "Queue backend started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), QueueError> {
        info!(provider = %self.consumer.provider(), "Queue backend stopped");
        Ok(())
    }

    async fn poll(&self) -> Result<bool, QueueError> {
        let batch = self.consumer.poll_batch(self.max_messages).await?;
        if batch.is_empty() {
            return Ok(false);
        }

        let metrics = self.dispatcher.metrics();
        metrics.record_received(batch.len());

        let (parsed, errors) = parse_batch(&self.codec, &batch);
        for _ in &errors {
            metrics.record_parse_error();
        }

        for (raw, message) in parsed {
            match self.dispatcher.dispatch(&message).await {
                Ok(outcome) if self.should_ack(outcome) => {
                    if let Err(e) = self.consumer.ack(&raw.receipt_handle).await {
                        warn!(message_id = %raw.id, error = %e, "Failed to ack message");
                    }
                }
                Ok(outcome) => {
                    debug!(message_id = %raw.id, outcome = outcome.as_str(), "Leaving message for redelivery");
                }
                Err(e) => {
                    warn!(
                        message_id = %raw.id,
                        method = %message.method(),
                        attempt = raw.attempt_count,
                        error = %e,
                        "Work message failed"
                    );
                }
            }
        }

        Ok(true)
    }

    fn metrics(&self) -> Option<Arc<BackendMetrics>> {
        Some(self.dispatcher.metrics().clone())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        self.consumer.health_check().await
    }
}
