mod health;
mod tasks;

pub use health::{health, metrics, HealthResponse, MetricsResponse};
pub use tasks::{enqueue_work, run_work};
