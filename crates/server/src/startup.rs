//! Wire the configured backend, its sender and the worker pool together.

use std::sync::Arc;

use drudge_core::{BackendKind, Config, MessageCodec, WorkMethods};
use drudge_pool::WorkerPool;
use drudge_queue::{
    Backend, LocalBackend, PubSubBackend, QueueBackend, Sender, SqsConsumer, SqsSender,
};
use tracing::info;

use crate::state::AppState;

/// A backend plus, when the transport allows it, a sender feeding it.
pub struct BackendParts {
    pub backend: Arc<dyn Backend>,
    pub sender: Option<Arc<dyn Sender>>,
}

pub fn build_backend(config: &Config, methods: Arc<WorkMethods>, codec: MessageCodec) -> BackendParts {
    match config.backend {
        BackendKind::Local => {
            let local = Arc::new(LocalBackend::new(methods));
            BackendParts {
                backend: local.clone(),
                sender: Some(local),
            }
        }
        BackendKind::Sqs => {
            let consumer = SqsConsumer::new(&config.aws, &config.sqs);
            let backend = QueueBackend::new(consumer, methods, codec)
                .with_ack_policy(config.sqs.ack_policy)
                .with_max_messages(config.sqs.max_messages.max(1) as u32);
            BackendParts {
                backend: Arc::new(backend),
                sender: Some(Arc::new(SqsSender::new(&config.aws, &config.sqs, codec))),
            }
        }
        BackendKind::PubSub => BackendParts {
            backend: Arc::new(PubSubBackend::new(&config.pubsub, methods, codec)),
            sender: None,
        },
    }
}

/// Build the pool and admin state for `config`. The pool is not started.
pub fn build_state(config: &Config, methods: WorkMethods) -> AppState {
    let codec = MessageCodec::new();
    let methods = Arc::new(methods);
    let parts = build_backend(config, methods.clone(), codec);

    info!(
        backend = %parts.backend.name(),
        methods = ?methods.names(),
        "Worker assembled"
    );

    let pool = WorkerPool::new("worker", config.scheduler.clone(), parts.backend);
    let state = AppState::new(pool, methods, codec);
    match parts.sender {
        Some(sender) => state.with_sender(sender),
        None => state,
    }
}
