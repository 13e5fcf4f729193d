//! Diagnostic work methods every worker registers.

use std::time::Duration;

use drudge_core::{MessageCodec, Params, WorkMethod};
use serde::Deserialize;
use tracing::info;

/// Longest a `sleep` message may hold a poll loop.
const MAX_SLEEP_MS: u64 = 60_000;

#[derive(Debug, Deserialize)]
struct SleepParams {
    #[serde(default)]
    ms: u64,
}

/// `ping` logs its params; `sleep` holds a loop for `ms` milliseconds.
pub fn builtin_methods(codec: MessageCodec) -> Vec<WorkMethod> {
    vec![
        WorkMethod::consumer("ping", |params: Params| async move {
            info!(params = %serde_json::Value::Object(params), "ping");
            Ok(())
        }),
        WorkMethod::typed("sleep", codec, |p: SleepParams| async move {
            tokio::time::sleep(Duration::from_millis(p.ms.min(MAX_SLEEP_MS))).await;
            Ok(true)
        }),
    ]
}
