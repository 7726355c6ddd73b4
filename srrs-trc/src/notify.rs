//! State change notification.
//!
//! Every subscriber owns a single-slot channel. A change fills the slot if it
//! is empty and is dropped otherwise, so a subscriber only learns that the
//! state changed since it last looked, never how often.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

#[derive(Default)]
struct Slots {
    senders: HashMap<u64, mpsc::Sender<()>>,
    next_id: u64,
    closed: bool,
}

/// Fans change signals out to subscribers.
#[derive(Default)]
pub struct Notifier {
    slots: Mutex<Slots>,
}

impl Notifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a subscriber. Returns `None` once the notifier is closed.
    pub fn subscribe(self: &Arc<Self>) -> Option<StateSubscription> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return None;
        }
        let (tx, rx) = mpsc::channel(1);
        let id = slots.next_id;
        slots.next_id += 1;
        slots.senders.insert(id, tx);

        Some(StateSubscription {
            id,
            rx,
            notifier: Arc::downgrade(self),
        })
    }

    /// Signals every subscriber without blocking.
    ///
    /// Returns the number of subscribers whose slot was empty.
    pub fn notify(&self) -> usize {
        let slots = self.slots.lock();
        let mut delivered = 0;
        for tx in slots.senders.values() {
            match tx.try_send(()) {
                Ok(()) => {
                    tracing::debug!("Sending state update notification...");
                    delivered += 1;
                }
                Err(_) => tracing::debug!("Skipping update..."),
            }
        }
        delivered
    }

    /// Drops every subscriber slot and refuses new subscriptions.
    ///
    /// Subscribers observe the close as [`StateSubscription::changed`]
    /// returning `false`.
    pub fn close(&self) {
        let mut slots = self.slots.lock();
        slots.closed = true;
        slots.senders.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.slots.lock().senders.remove(&id);
    }
}

/// Receiving end of a state change subscription.
///
/// Dropping it unsubscribes.
pub struct StateSubscription {
    id: u64,
    rx: mpsc::Receiver<()>,
    notifier: Weak<Notifier>,
}

impl StateSubscription {
    /// Waits for the next change.
    ///
    /// Returns `false` when the connection was closed.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consumes a pending change signal, if any.
    pub fn has_changed(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Tears the subscription down.
    pub fn unsubscribe(self) {}
}

impl Drop for StateSubscription {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.remove(self.id);
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}
