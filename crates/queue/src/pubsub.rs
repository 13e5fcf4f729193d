//! ZeroMQ PUB/SUB backend and sender.
//!
//! Messages travel as two-frame ZMQ messages: `[channel, json body]`. The
//! channel frame lets SUB sockets filter by prefix.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drudge_core::config::PubSubConfig;
use drudge_core::{MessageCodec, WorkMessage, WorkMethods};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::backend::{Backend, Sender};
use crate::dispatch::Dispatcher;
use crate::error::QueueError;
use crate::metrics::BackendMetrics;

/// Worker backend subscribed to one pub/sub channel.
///
/// Each poll waits up to `recv_timeout` for a single message. The socket is
/// shared by all poll loops, so receives are serialized.
pub struct PubSubBackend {
    endpoint: String,
    channel: String,
    recv_timeout: Duration,
    socket: Mutex<Option<SubSocket>>,
    codec: MessageCodec,
    dispatcher: Dispatcher,
}

impl PubSubBackend {
    pub fn new(config: &PubSubConfig, methods: Arc<WorkMethods>, codec: MessageCodec) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            channel: config.channel.clone(),
            recv_timeout: config.recv_timeout(),
            socket: Mutex::new(None),
            codec,
            dispatcher: Dispatcher::new(methods, Arc::new(BackendMetrics::new())),
        }
    }

    /// Wait for one message body. `None` when nothing arrived in time.
    async fn recv_body(&self) -> Result<Option<String>, QueueError> {
        let mut guard = self.socket.lock().await;
        let socket = guard
            .as_mut()
            .ok_or_else(|| QueueError::NotStarted(format!("pubsub {}", self.channel)))?;

        let zmq_msg = match tokio::time::timeout(self.recv_timeout, socket.recv()).await {
            Ok(received) => received?,
            Err(_) => return Ok(None),
        };

        // Body is the last frame; a single-frame message is all body.
        let body = zmq_msg
            .iter()
            .last()
            .map(|frame| String::from_utf8_lossy(frame.as_ref()).into_owned())
            .ok_or_else(|| QueueError::Parse("empty ZMQ message".into()))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl Backend for PubSubBackend {
    fn name(&self) -> &str {
        "pubsub"
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint, channel = %self.channel))]
    async fn start(&self) -> Result<(), QueueError> {
        let mut socket = SubSocket::new();
        info!("connecting SUB socket");
        socket.connect(&self.endpoint).await?;
        socket.subscribe(&self.channel).await?;
        *self.socket.lock().await = Some(socket);
        info!("subscribed to channel");
        Ok(())
    }

    async fn stop(&self) -> Result<(), QueueError> {
        // Dropping the socket closes it.
        if self.socket.lock().await.take().is_some() {
            info!(channel = %self.channel, "unsubscribed");
        }
        Ok(())
    }

    async fn poll(&self) -> Result<bool, QueueError> {
        let Some(body) = self.recv_body().await? else {
            return Ok(false);
        };

        let metrics = self.dispatcher.metrics();
        metrics.record_received(1);

        let message = match self.codec.decode(&body) {
            Ok(m) => m,
            Err(e) => {
                metrics.record_parse_error();
                warn!(channel = %self.channel, error = %e, "Failed to parse pubsub message");
                return Ok(true);
            }
        };

        if let Err(e) = self.dispatcher.dispatch(&message).await {
            warn!(method = %message.method(), error = %e, "Pubsub work message failed");
        }
        Ok(true)
    }

    fn metrics(&self) -> Option<Arc<BackendMetrics>> {
        Some(self.dispatcher.metrics().clone())
    }
}

/// Publishes work messages onto a channel.
pub struct PubSubSender {
    channel: String,
    codec: MessageCodec,
    socket: Mutex<PubSocket>,
}

impl PubSubSender {
    /// Bind a PUB socket that workers connect to.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn bind(
        endpoint: &str,
        channel: impl Into<String>,
        codec: MessageCodec,
    ) -> Result<Self, QueueError> {
        let mut socket = PubSocket::new();
        info!("binding PUB socket");
        socket.bind(endpoint).await?;
        Ok(Self {
            channel: channel.into(),
            codec,
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl Sender for PubSubSender {
    async fn send(&self, message: &WorkMessage) -> Result<(), QueueError> {
        let body = self.codec.encode(message)?;

        let mut zmq_msg = ZmqMessage::from(self.channel.as_str());
        zmq_msg.push_back(body.into_bytes().into());

        self.socket.lock().await.send(zmq_msg).await?;
        debug!(channel = %self.channel, method = %message.method(), "published work message");
        Ok(())
    }
}
