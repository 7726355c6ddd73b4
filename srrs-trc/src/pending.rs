//! Correlation of requests with their replies.

use crate::error::TrcError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use srrs_protocol::{Message, MessageId};
use std::sync::Arc;
use tokio::sync::oneshot;

type Table = DashMap<MessageId, oneshot::Sender<Message>>;

/// Pending requests waiting for replies, keyed by request id.
#[derive(Default)]
pub struct Correlator {
    pending: Arc<Table>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reply slot for `id`.
    ///
    /// The slot is deregistered when the returned [`PendingReply`] is dropped,
    /// whether or not a reply arrived.
    pub fn register(&self, id: MessageId) -> Result<PendingReply, TrcError> {
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => return Err(TrcError::DuplicateRequestId(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        Ok(PendingReply {
            id,
            rx,
            table: self.pending.clone(),
        })
    }

    /// Hands `message` to the request named by its `parent_id`.
    ///
    /// Returns `false` if no request is waiting for it.
    pub fn deliver(&self, message: Message) -> bool {
        let Some(parent_id) = message.parent_id.as_ref() else {
            return false;
        };
        match self.pending.remove(parent_id) {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => {
                tracing::debug!(parent_id = %parent_id, "No pending request for reply");
                false
            }
        }
    }

    /// Drops every reply slot; their waiters see the connection as closed.
    pub fn clear(&self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A registered reply slot.
pub struct PendingReply {
    id: MessageId,
    rx: oneshot::Receiver<Message>,
    table: Arc<Table>,
}

impl PendingReply {
    /// Waits for the reply. Fails with [`TrcError::Closed`] if the slot was
    /// dropped without one.
    pub async fn recv(&mut self) -> Result<Message, TrcError> {
        (&mut self.rx).await.map_err(|_| TrcError::Closed)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
