//! Decode raw queue bodies into [`WorkMessage`]s.

use drudge_core::{MessageCodec, WorkMessage};
use tracing::warn;

use crate::consumer::QueueMessage;
use crate::error::QueueError;

/// Parse a single queue message body.
///
/// Only rejects bodies the codec rejects: invalid JSON, a non-object, or a
/// missing / empty `method`.
pub fn parse_message(codec: &MessageCodec, msg: &QueueMessage) -> Result<WorkMessage, QueueError> {
    codec
        .decode(&msg.body)
        .map_err(|e| QueueError::Parse(format!("message {}: {}", msg.id, e)))
}

/// Parse a batch of messages, separating successes from failures.
///
/// Returns `(parsed, errors)`. Good messages are never blocked by bad ones;
/// each parsed message is paired with the raw message it came from so the
/// caller can ack it.
pub fn parse_batch<'a>(
    codec: &MessageCodec,
    messages: &'a [QueueMessage],
) -> (Vec<(&'a QueueMessage, WorkMessage)>, Vec<(String, QueueError)>) {
    let mut parsed = Vec::with_capacity(messages.len());
    let mut errors = Vec::new();

    for msg in messages {
        match parse_message(codec, msg) {
            Ok(work) => parsed.push((msg, work)),
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "Failed to parse queue message");
                errors.push((msg.id.clone(), e));
            }
        }
    }

    (parsed, errors)
}
