pub mod error;
pub mod pool;
pub mod types;

pub use error::PoolError;
pub use pool::WorkerPool;
pub use types::{PoolState, PoolStats};
