//! # srrs-protocol
//!
//! Wire protocol spoken between TRC (the turtle remote control process) and SRRS.
//!
//! This crate provides:
//! - The message envelope and message identifiers
//! - Handshake payload and protocol version negotiation
//! - TRC state types with patch-style merging
//! - Newline-delimited JSON encoding and decoding

pub mod codec;
pub mod error;
pub mod message;
pub mod state;
pub mod version;

pub use codec::LineDecoder;
pub use error::{ProtocolError, ValidationError};
pub use message::{Handshake, Message, MessageId, MessageType, Validate};
pub use state::{
    BallFound, Command, Cpb, HomeGoal, KinectState, Role, State, TeamColor, TurtleState,
};
pub use version::ProtocolVersion;

/// Protocol version supported by this implementation.
pub const DEFAULT_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// Maximum length of a single encoded message (1 MiB).
pub const MAX_LINE_SIZE: usize = 1024 * 1024;
