//! Broker link abstraction.
//!
//! A [`BrokerConnector`] opens [`BrokerLink`]s; a link is one live channel
//! to the broker that correlates requests with replies by `request_id`.
//! The bridge only talks to these traits, so tests can inject the
//! in-memory [`mock::MockBroker`].

use std::sync::Arc;

use async_trait::async_trait;

use rearlink_core::protocol::{BrokerMessage, ClientMessage};

use crate::error::LinkError;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
mod replies;
#[cfg(unix)]
pub mod unix;

pub use replies::{ReplySlot, ReplySlots};
#[cfg(unix)]
pub use unix::{UnixBrokerConnector, UnixBrokerLink};

/// Opens links to the broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a new link. Fails with [`LinkError::Unavailable`] when the broker
    /// is not running or not installed.
    async fn connect(&self) -> Result<Arc<dyn BrokerLink>, LinkError>;
}

/// One open channel to the broker.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Send a message that expects no reply.
    async fn send(&self, message: ClientMessage) -> Result<(), LinkError>;

    /// Send a request and wait for the reply carrying its `request_id`.
    ///
    /// Dropping the returned future forgets the reply slot; a late reply is
    /// discarded.
    async fn call(&self, request: ClientMessage) -> Result<BrokerMessage, LinkError>;

    /// Whether the link has closed, from either side.
    fn is_closed(&self) -> bool;

    /// Resolves once the link is closed.
    async fn closed(&self);

    /// Close the link. Outstanding calls fail with [`LinkError::Closed`].
    async fn close(&self);
}
