//! Latest merged TRC state.

use parking_lot::RwLock;
use serde_json::Value;
use srrs_protocol::{ProtocolError, State};
use std::sync::Arc;

/// Holds the current state snapshot.
///
/// Snapshots are immutable; an update merges onto a copy of the current one
/// and swaps the pointer, so readers never observe a partially applied patch.
#[derive(Debug, Default)]
pub struct StateStore {
    current: RwLock<Arc<State>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<State> {
        self.current.read().clone()
    }

    /// Merges `patch` into the current state and publishes the result.
    ///
    /// On error the current snapshot is left unchanged.
    pub fn apply(&self, patch: &Value) -> Result<Arc<State>, ProtocolError> {
        let mut current = self.current.write();
        let merged = Arc::new(current.merge(patch)?);
        *current = merged.clone();
        Ok(merged)
    }
}
