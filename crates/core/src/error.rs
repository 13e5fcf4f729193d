use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrudgeError {
    #[error("Unknown work method: {0}")]
    UnknownMethod(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Work method {method} failed: {reason}")]
    HandlerFailure { method: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl DrudgeError {
    /// Build a [`DrudgeError::HandlerFailure`], keeping the full error chain in the reason.
    pub fn handler_failure(method: &str, err: &anyhow::Error) -> Self {
        Self::HandlerFailure {
            method: method.to_string(),
            reason: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, DrudgeError>;
