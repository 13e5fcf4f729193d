pub mod backend;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod local;
pub mod metrics;
pub mod parser;
pub mod pubsub;
pub mod queue_backend;
pub mod sqs;

pub use backend::{Backend, Sender};
pub use consumer::{QueueConsumer, QueueHealth, QueueMessage};
pub use dispatch::{Dispatcher, Outcome};
pub use error::QueueError;
pub use local::LocalBackend;
pub use metrics::{BackendMetrics, DurationStats, MethodStats, MetricsSnapshot};
pub use parser::{parse_batch, parse_message};
pub use pubsub::{PubSubBackend, PubSubSender};
pub use queue_backend::QueueBackend;
pub use sqs::{SqsConsumer, SqsSender};
