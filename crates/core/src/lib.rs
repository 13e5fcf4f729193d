pub mod config;
pub mod dst;
pub mod error;
pub mod message;
pub mod method;
pub mod registry;

pub use config::{AckPolicy, BackendKind, Config, SchedulerConfig};
pub use dst::DstGate;
pub use error::DrudgeError;
pub use message::{MessageCodec, Params, WorkMessage};
pub use method::{HandlerFuture, WorkMethod};
pub use registry::WorkMethods;
