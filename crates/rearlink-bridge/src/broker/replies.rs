//! Reply correlation for request/response traffic on a link.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use rearlink_core::protocol::BrokerMessage;

type Waiters = HashMap<String, oneshot::Sender<BrokerMessage>>;

/// Reply waiters keyed by `request_id`.
///
/// Uses a blocking mutex so slots can be released from `Drop`.
#[derive(Clone, Default)]
pub struct ReplySlots {
    waiters: Arc<Mutex<Waiters>>,
}

impl ReplySlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter. The slot is released when the returned guard drops.
    pub fn register(&self, request_id: String) -> (ReplySlot, oneshot::Receiver<BrokerMessage>) {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(request_id.clone(), tx);
        let slot = ReplySlot {
            slots: self.clone(),
            request_id,
        };
        (slot, rx)
    }

    /// Deliver a reply. Returns `false` when nobody is waiting for it.
    pub fn complete(&self, request_id: &str, reply: BrokerMessage) -> bool {
        let waiter = self.lock().remove(request_id);
        waiter.is_some_and(|tx| tx.send(reply).is_ok())
    }

    /// Hand a copy of `message` to every waiter and forget them all.
    ///
    /// For broker messages addressed to the session rather than a request.
    pub fn broadcast(&self, message: &BrokerMessage) -> usize {
        let waiters: Vec<_> = self.lock().drain().map(|(_, tx)| tx).collect();
        waiters
            .into_iter()
            .map(|tx| tx.send(message.clone()))
            .filter(Result::is_ok)
            .count()
    }

    /// Drop every waiter; their receivers observe the link as closed.
    pub fn clear(&self) -> usize {
        let mut waiters = self.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guard over one registered reply slot.
pub struct ReplySlot {
    slots: ReplySlots,
    request_id: String,
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if self.slots.lock().remove(&self.request_id).is_some() {
            debug!(request_id = %self.request_id, "Released unanswered reply slot");
        }
    }
}
