use std::sync::Arc;

use drudge_core::{MessageCodec, WorkMethods};
use drudge_pool::WorkerPool;
use drudge_queue::Sender;

/// Shared state behind the admin router.
pub struct AppState {
    pub pool: WorkerPool,
    pub methods: Arc<WorkMethods>,
    pub codec: MessageCodec,
    /// Where `/tasks/enqueue` puts messages. `None` for receive-only backends.
    pub sender: Option<Arc<dyn Sender>>,
}

impl AppState {
    pub fn new(pool: WorkerPool, methods: Arc<WorkMethods>, codec: MessageCodec) -> Self {
        Self {
            pool,
            methods,
            codec,
            sender: None,
        }
    }

    pub fn with_sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }
}
