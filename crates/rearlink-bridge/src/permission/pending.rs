//! Outstanding consent requests.
//!
//! A consent request stays pending while the broker waits on the user.
//! Whoever removes the record first owns its outcome: the waiter settling
//! a reply, the guard cancelling on drop, or the bridge draining on
//! disconnect. The others see it gone and do nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{debug, warn};

use rearlink_core::OperationId;
use rearlink_core::protocol::ClientMessage;

use crate::broker::BrokerLink;

/// A consent request awaiting the broker's answer.
#[derive(Debug, Clone)]
pub struct PendingConsent {
    pub request_id: String,
    pub operation: OperationId,
    /// Session epoch the request was sent in.
    pub epoch: u64,
    pub created_at: Instant,
}

impl PendingConsent {
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Tracks consent requests that have been sent but not answered.
///
/// Uses a blocking mutex so [`PendingGuard`] can release its record from
/// `Drop`.
#[derive(Debug, Default)]
pub struct PendingManager {
    requests: Mutex<HashMap<String, PendingConsent>>,
}

impl PendingManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingConsent>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new request. Dropping the guard before settling it sends
    /// `cancel_permission` over `link`.
    pub fn register(
        self: &Arc<Self>,
        request_id: String,
        operation: OperationId,
        epoch: u64,
        link: Arc<dyn BrokerLink>,
    ) -> PendingGuard {
        let consent = PendingConsent {
            request_id: request_id.clone(),
            operation,
            epoch,
            created_at: Instant::now(),
        };
        self.lock().insert(request_id.clone(), consent);
        debug!(request_id = %request_id, "Added pending consent request");
        PendingGuard {
            manager: Arc::clone(self),
            request_id,
            link,
            armed: true,
        }
    }

    /// Remove and return a pending request.
    pub fn take(&self, request_id: &str) -> Option<PendingConsent> {
        let consent = self.lock().remove(request_id);
        if consent.is_some() {
            debug!(request_id, "Removed pending consent request");
        }
        consent
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.lock().contains_key(request_id)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Remove every pending request, oldest first.
    pub fn drain(&self) -> Vec<PendingConsent> {
        let mut drained: Vec<_> = self.lock().drain().map(|(_, c)| c).collect();
        drained.sort_by_key(|c| c.created_at);
        drained
    }
}

/// Ownership of one pending consent request.
pub struct PendingGuard {
    manager: Arc<PendingManager>,
    request_id: String,
    link: Arc<dyn BrokerLink>,
    armed: bool,
}

impl PendingGuard {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The broker answered; forget the request without cancelling it.
    ///
    /// Returns `None` when the request was already drained by a disconnect.
    pub fn settle(mut self) -> Option<PendingConsent> {
        self.armed = false;
        self.manager.take(&self.request_id)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed || self.manager.take(&self.request_id).is_none() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(request_id = %self.request_id, "No runtime to cancel consent request");
            return;
        };
        let link = Arc::clone(&self.link);
        let request_id = std::mem::take(&mut self.request_id);
        handle.spawn(async move {
            debug!(request_id = %request_id, "Cancelling abandoned consent request");
            if let Err(e) = link
                .send(ClientMessage::CancelPermission {
                    request_id: request_id.clone(),
                })
                .await
            {
                debug!(request_id = %request_id, error = %e, "Cancel not delivered");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::broker::BrokerConnector;
    use crate::broker::mock::MockBroker;

    fn op() -> OperationId {
        OperationId::new("toggle-display").unwrap()
    }

    #[tokio::test]
    async fn settle_does_not_cancel() {
        let broker = MockBroker::new();
        let link = broker.connect().await.unwrap();
        let manager = Arc::new(PendingManager::new());

        let guard = manager.register("req-1".into(), op(), 1, link);
        assert!(manager.contains("req-1"));
        let consent = guard.settle().unwrap();
        assert_eq!(consent.operation, op());
        assert_eq!(manager.count(), 0);

        tokio::task::yield_now().await;
        assert!(broker.cancelled_ids().is_empty());
    }

    #[tokio::test]
    async fn dropping_guard_sends_cancel() {
        let broker = MockBroker::new();
        let link = broker.connect().await.unwrap();
        let manager = Arc::new(PendingManager::new());

        drop(manager.register("req-2".into(), op(), 1, link));
        assert_eq!(manager.count(), 0);

        assert!(broker.wait_for(|b| !b.cancelled_ids().is_empty()).await);
        assert_eq!(broker.cancelled_ids(), vec!["req-2".to_string()]);
    }

    #[tokio::test]
    async fn drained_request_is_not_cancelled_twice() {
        let broker = MockBroker::new();
        let link = broker.connect().await.unwrap();
        let manager = Arc::new(PendingManager::new());

        let guard = manager.register("req-3".into(), op(), 1, link);
        let drained = manager.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].request_id, "req-3");

        drop(guard);
        tokio::task::yield_now().await;
        assert!(broker.cancelled_ids().is_empty());
    }

    #[test]
    fn take_unknown_is_none() {
        let manager = PendingManager::new();
        assert!(manager.take("nope").is_none());
        assert!(manager.drain().is_empty());
    }
}
