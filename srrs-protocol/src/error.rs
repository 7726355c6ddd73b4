//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while encoding or decoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in message")]
    InvalidUtf8,

    #[error("line too long: {size} bytes (max {max})")]
    LineTooLong { size: usize, max: usize },

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("invalid protocol version: {0:?}")]
    InvalidVersion(String),

    #[error("state patch must be a JSON object, got {0}")]
    PatchNotObject(&'static str),
}

/// Returned by [`Validate::validate`](crate::Validate::validate) when a payload
/// must not be sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Path of the offending field, e.g. `turtles.T1.batteryvoltage`.
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
