//! Work message envelope and its JSON codec.
//!
//! A [`WorkMessage`] names a registered work method and carries its
//! parameters plus an optional enqueue timestamp. On the wire it is a JSON
//! object `{"method": ..., "params": {...}, "at": <epoch millis>}` where
//! `params` is omitted when empty and `at` when absent.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{DrudgeError, Result};

/// Parameters passed to a work method.
pub type Params = Map<String, Value>;

/// Immutable envelope describing one unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkMessage {
    method: String,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Map::is_empty"
    )]
    params: Params,

    /// When the message was queued. Only used for queue-delay telemetry.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    at: Option<DateTime<Utc>>,
}

/// JSON5 may surface whole numbers as floats; fold them back to integers.
fn integral_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(integral_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, integral_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Params, D::Error> {
    Ok(Option::<Params>::deserialize(d)?.unwrap_or_default())
}

impl WorkMessage {
    /// A message with no parameters.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Params::new(),
            at: None,
        }
    }

    pub fn with_params(method: impl Into<String>, params: Params) -> Self {
        Self {
            method: method.into(),
            params,
            at: None,
        }
    }

    /// A message stamped with its enqueue time.
    pub fn queued(method: impl Into<String>, params: Params, at: DateTime<Utc>) -> Self {
        Self {
            method: method.into(),
            params,
            at: Some(at),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        self.at
    }
}

/// JSON codec for work messages and handler parameters.
///
/// Constructed explicitly and handed to whichever component needs it
/// (backends, senders, typed handlers, the manual trigger).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec {
    _private: (),
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a message to its wire form.
    pub fn encode(&self, message: &WorkMessage) -> Result<String> {
        if message.method.is_empty() {
            return Err(DrudgeError::MalformedMessage(
                "method must not be empty".into(),
            ));
        }
        serde_json::to_string(message).map_err(|e| DrudgeError::Serialize(e.to_string()))
    }

    /// Parse a message body.
    ///
    /// Rejects bodies that are not a JSON object or that lack a non-empty
    /// `method`. Missing `params` / `at` default to empty / absent.
    pub fn decode(&self, body: &str) -> Result<WorkMessage> {
        let json: Value = serde_json::from_str(body)
            .map_err(|e| DrudgeError::MalformedMessage(format!("invalid JSON: {e}")))?;

        if !json.is_object() {
            return Err(DrudgeError::MalformedMessage(
                "body is not a JSON object".into(),
            ));
        }

        let message: WorkMessage = serde_json::from_value(json)
            .map_err(|e| DrudgeError::MalformedMessage(e.to_string()))?;

        if message.method.is_empty() {
            return Err(DrudgeError::MalformedMessage(
                "method must not be empty".into(),
            ));
        }
        Ok(message)
    }

    /// Parse a parameter object leniently: unquoted keys and single-quoted
    /// strings are accepted. Used by the manual trigger.
    pub fn parse_params_lenient(&self, text: &str) -> Result<Params> {
        let value: Value =
            json5::from_str(text).map_err(|e| DrudgeError::MalformedMessage(e.to_string()))?;
        match integral_numbers(value) {
            Value::Object(map) => Ok(map),
            other => Err(DrudgeError::MalformedMessage(format!(
                "params must be a JSON object, got {other}"
            ))),
        }
    }

    /// Render parameters as compact JSON.
    pub fn params_to_string(&self, params: &Params) -> String {
        Value::Object(params.clone()).to_string()
    }

    /// Convert generic parameters into a concrete shape.
    pub fn convert<T: DeserializeOwned>(&self, params: &Params) -> Result<T> {
        serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| DrudgeError::MalformedMessage(format!("params do not match: {e}")))
    }
}
