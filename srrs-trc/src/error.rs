//! Connection error types.

use srrs_protocol::{ProtocolVersion, ValidationError};
use thiserror::Error;

/// Errors produced by a TRC connection.
#[derive(Debug, Error)]
pub enum TrcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] srrs_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("major version mismatch: local {local}, peer {peer}")]
    VersionMismatch {
        local: ProtocolVersion,
        peer: ProtocolVersion,
    },

    #[error("connection is closed")]
    Closed,

    #[error("payload is invalid: {0}")]
    Invalid(#[from] ValidationError),

    #[error("empty turtle state specified")]
    EmptyTurtleState,

    #[error("unmatched message type: {0}")]
    UnknownMessageType(String),

    #[error("failed to merge state update: {0}")]
    StateMerge(srrs_protocol::ProtocolError),

    #[error("failed to reply to ping: {0}")]
    PingReply(Box<TrcError>),

    #[error("no token configured")]
    NoToken,

    #[error("request id {0} is already pending")]
    DuplicateRequestId(String),

    #[error("request timeout")]
    Timeout,

    #[error("TRC unavailable: {0}")]
    Unavailable(String),
}

impl TrcError {
    /// Returns whether this error ended the connection's dispatch loop.
    ///
    /// Errors delivered on the error channel that are not fatal describe a
    /// single message the loop skipped over.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TrcError::StateMerge(_) | TrcError::PingReply(_))
    }
}
