//! Named work methods and the handler adapters that build them.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::{DrudgeError, Result};
use crate::message::{MessageCodec, Params};

/// Boxed future returned by every work-method handler.
///
/// Resolves to `true` when the handler did its work and `false` when it
/// recognized the message but intentionally skipped it.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>>;

type HandlerFn = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;

/// A named handler that background messages are dispatched to.
#[derive(Clone)]
pub struct WorkMethod {
    name: String,
    handler: HandlerFn,
}

impl WorkMethod {
    /// Register a handler that reports whether it handled the message.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |params| Box::pin(handler(params))),
        }
    }

    /// Register a handler with no result; it always counts as handled.
    pub fn consumer<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(name, move |params| {
            let fut = handler(params);
            async move { fut.await.map(|()| true) }
        })
    }

    /// Register a handler that takes a concrete parameter type.
    ///
    /// Parameters are converted through `codec` before the handler runs; a
    /// shape mismatch fails the invocation without calling `handler`.
    pub fn typed<T, F, Fut>(name: impl Into<String>, codec: MessageCodec, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self::new(name, move |params: Params| {
            let fut = codec.convert::<T>(&params).map(&handler);
            async move {
                match fut {
                    Ok(fut) => fut.await,
                    Err(e) => Err(anyhow::Error::new(e)),
                }
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the raw handler.
    pub(crate) fn call(&self, params: Params) -> HandlerFuture {
        (self.handler)(params)
    }

    /// Run the handler, mapping any failure to [`DrudgeError::HandlerFailure`].
    pub async fn invoke(&self, params: Params) -> Result<bool> {
        self.call(params)
            .await
            .map_err(|e| DrudgeError::handler_failure(&self.name, &e))
    }
}

impl fmt::Debug for WorkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkMethod").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_fn_handler_reports_result() {
        let method = WorkMethod::new("maybe", |p: Params| async move {
            Ok(p.get("go").and_then(|v| v.as_bool()).unwrap_or(false))
        });

        assert!(method.invoke(params(json!({"go": true}))).await.unwrap());
        assert!(!method.invoke(Params::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_consumer_always_handled() {
        let seen = Arc::new(AtomicI64::new(0));
        let s = seen.clone();
        let method = WorkMethod::consumer("record", move |p: Params| {
            let s = s.clone();
            async move {
                s.store(p.get("val").and_then(|v| v.as_i64()).unwrap_or(-1), Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(method.invoke(params(json!({"val": 8}))).await.unwrap());
        assert_eq!(seen.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_typed_handler_converts_params() {
        #[derive(Deserialize)]
        struct Resize {
            width: u32,
            height: u32,
        }

        let method = WorkMethod::typed("resize", MessageCodec::new(), |r: Resize| async move {
            Ok(r.width * r.height > 0)
        });

        assert!(method
            .invoke(params(json!({"width": 4, "height": 3})))
            .await
            .unwrap());

        let err = method
            .invoke(params(json!({"width": "wide"})))
            .await
            .unwrap_err();
        match err {
            DrudgeError::HandlerFailure { method, reason } => {
                assert_eq!(method, "resize");
                assert!(reason.contains("params do not match"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_error_becomes_handler_failure() {
        let method = WorkMethod::new("explode", |_p: Params| async move {
            Err::<bool, _>(anyhow::anyhow!("kaboom"))
        });

        let err = method.invoke(Params::new()).await.unwrap_err();
        assert!(matches!(err, DrudgeError::HandlerFailure { .. }));
        assert!(err.to_string().contains("kaboom"));
    }
}
