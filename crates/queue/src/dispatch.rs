//! Resolve, invoke and measure one work message.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use drudge_core::{DrudgeError, WorkMessage, WorkMethods};
use futures::FutureExt;
use tracing::{debug, error};

use crate::metrics::BackendMetrics;

/// Result of a successful invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Skipped,
}

impl Outcome {
    pub fn is_handled(self) -> bool {
        matches!(self, Outcome::Handled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Handled => "handled",
            Outcome::Skipped => "skipped",
        }
    }
}

/// Shared dispatch step used by every backend.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    methods: Arc<WorkMethods>,
    metrics: Arc<BackendMetrics>,
}

impl Dispatcher {
    pub fn new(methods: Arc<WorkMethods>, metrics: Arc<BackendMetrics>) -> Self {
        Self { methods, metrics }
    }

    pub fn methods(&self) -> &Arc<WorkMethods> {
        &self.methods
    }

    pub fn metrics(&self) -> &Arc<BackendMetrics> {
        &self.metrics
    }

    /// Run the handler for `message` and record the outcome.
    ///
    /// A handler panic is reported as [`DrudgeError::HandlerFailure`].
    pub async fn dispatch(&self, message: &WorkMessage) -> Result<Outcome, DrudgeError> {
        let name = message.method();

        if let Some(at) = message.at() {
            let delay = (Utc::now() - at).to_std().unwrap_or_default();
            self.metrics.record_delay(name, delay);
        }

        let method = match self.methods.resolve(name) {
            Ok(m) => m,
            Err(e) => {
                self.metrics.record_error(name);
                return Err(e);
            }
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(method.invoke(message.params().clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic_reason(panic.as_ref());
                error!(method = %name, reason = %reason, "Work method panicked");
                Err(DrudgeError::HandlerFailure {
                    method: name.to_string(),
                    reason: format!("panicked: {reason}"),
                })
            });
        let elapsed = started.elapsed();

        match result {
            Ok(true) => {
                self.metrics.record_processed(name, elapsed);
                debug!(method = %name, elapsed_ms = elapsed.as_millis() as u64, "Handled");
                Ok(Outcome::Handled)
            }
            Ok(false) => {
                self.metrics.record_skipped(name, elapsed);
                debug!(method = %name, elapsed_ms = elapsed.as_millis() as u64, "Skipped");
                Ok(Outcome::Skipped)
            }
            Err(e) => {
                self.metrics.record_error(name);
                Err(e)
            }
        }
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use drudge_core::{Params, WorkMethod};
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let methods = WorkMethods::of([
            WorkMethod::new("yes", |_p: Params| async { Ok(true) }),
            WorkMethod::new("no", |_p: Params| async { Ok(false) }),
            WorkMethod::new("fail", |_p: Params| async { Err(anyhow::anyhow!("nope")) }),
            WorkMethod::new("panic", |p: Params| async move {
                if p.is_empty() {
                    panic!("boom");
                }
                Ok(true)
            }),
        ]);
        Dispatcher::new(Arc::new(methods), Arc::new(BackendMetrics::new()))
    }

    #[tokio::test]
    async fn test_outcomes_are_counted() {
        let d = dispatcher();

        assert_eq!(d.dispatch(&WorkMessage::new("yes")).await.unwrap(), Outcome::Handled);
        assert_eq!(d.dispatch(&WorkMessage::new("no")).await.unwrap(), Outcome::Skipped);
        assert!(d.dispatch(&WorkMessage::new("fail")).await.is_err());

        let m = d.metrics();
        assert_eq!(m.processed(), 1);
        assert_eq!(m.skipped(), 1);
        assert_eq!(m.errors(), 1);
        assert_eq!(m.method("fail").unwrap().errors, 1);
        assert_eq!(m.method("yes").unwrap().timing.count, 1);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher();
        let err = d.dispatch(&WorkMessage::new("ghost")).await.unwrap_err();

        assert!(matches!(err, DrudgeError::UnknownMethod(ref n) if n == "ghost"));
        assert_eq!(d.metrics().method("ghost").unwrap().errors, 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_handler_failure() {
        let d = dispatcher();
        let err = d.dispatch(&WorkMessage::new("panic")).await.unwrap_err();

        match err {
            DrudgeError::HandlerFailure { method, reason } => {
                assert_eq!(method, "panic");
                assert!(reason.contains("boom"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(d.metrics().errors(), 1);
    }

    #[tokio::test]
    async fn test_queue_delay_recorded() {
        let d = dispatcher();
        let at = Utc::now() - ChronoDuration::seconds(2);
        let params = json!({}).as_object().cloned().unwrap();
        d.dispatch(&WorkMessage::queued("yes", params, at)).await.unwrap();

        let delay = d.metrics().method("yes").unwrap().delay;
        assert_eq!(delay.count, 1);
        assert!(delay.max_ms >= 2_000);

        // A timestamp in the future clamps to zero.
        let future = Utc::now() + ChronoDuration::seconds(60);
        d.dispatch(&WorkMessage::queued("no", Params::new(), future)).await.unwrap();
        assert_eq!(d.metrics().method("no").unwrap().delay.max_ms, 0);
    }
}
