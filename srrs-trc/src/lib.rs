//! # srrs-trc
//!
//! Protocol engine for the TRC side of SRRS.
//!
//! This crate provides:
//! - Version-negotiating handshake with TRC
//! - Request/reply correlation over one duplex stream
//! - Merged state snapshots with coalescing change notification
//! - Liveness monitoring and a reconnecting connection pool

pub mod connection;
mod dispatch;
pub mod error;
pub mod handshake;
pub mod liveness;
pub mod notify;
pub mod pending;
pub mod pool;
pub mod store;
pub mod stream;
pub mod wire;

#[cfg(test)]
mod testing;

pub use connection::Conn;
pub use error::TrcError;
pub use notify::StateSubscription;
pub use pool::{dial, Pool, PoolConfig};
pub use stream::{Endpoint, TrcStream};
