//! Protocol version and handshake negotiation.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` protocol version, serialized as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ProtocolVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Negotiates the version to use with a peer requesting `peer`.
    ///
    /// Returns `None` if the major versions differ. If the peer asks for a
    /// newer minor version than `self`, `self` is used; otherwise the peer's
    /// version is accepted unchanged.
    pub fn negotiate(&self, peer: &ProtocolVersion) -> Option<ProtocolVersion> {
        if peer.major != self.major {
            return None;
        }
        if peer.minor > self.minor {
            return Some(*self);
        }
        Some(*peer)
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        crate::DEFAULT_VERSION
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidVersion(s.to_string());
        let mut parts = s.trim().splitn(3, '.');
        let mut next = || -> Result<u64, ProtocolError> {
            parts
                .next()
                .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                .ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())
        };
        Ok(Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        })
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
