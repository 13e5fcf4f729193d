use drudge_queue::QueueError;
use thiserror::Error;

use crate::types::PoolState;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("backend failed to start: {0}")]
    BackendStart(#[source] QueueError),

    #[error("pool is {actual}, expected {expected}")]
    InvalidState {
        expected: PoolState,
        actual: PoolState,
    },

    #[error("poll loop rejected: pool is shutting down")]
    SubmissionRejected,
}
