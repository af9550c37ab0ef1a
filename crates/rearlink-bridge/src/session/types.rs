//! Session types.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use rearlink_core::OperationId;

use super::state::SessionState;
use crate::broker::BrokerLink;
use crate::permission::{GrantTable, PermissionGrant};

/// Opaque token the broker issues to identify this client.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientToken(String);

impl ClientToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "ClientToken({prefix}..)")
    }
}

/// Point-in-time view of a session, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub state: SessionState,
    pub epoch: u64,
    pub broker_version: Option<u32>,
    pub grant_count: usize,
}

/// What a teardown released.
pub(crate) struct Teardown {
    pub link: Option<Arc<dyn BrokerLink>>,
    pub token: Option<ClientToken>,
    pub grants_dropped: usize,
}

/// Live session state, guarded by the bridge's session lock.
#[derive(Default)]
pub struct Session {
    state: SessionState,
    epoch: u64,
    token: Option<ClientToken>,
    broker_version: Option<u32>,
    link: Option<Arc<dyn BrokerLink>>,
    grants: GrantTable,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Counter identifying the current (or last) Connected period.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    pub const fn token(&self) -> Option<&ClientToken> {
        self.token.as_ref()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            state: self.state,
            epoch: self.epoch,
            broker_version: self.broker_version,
            grant_count: self.valid_grants().count(),
        }
    }

    /// The grant for `operation`, if it is valid right now.
    pub fn valid_grant(&self, operation: &OperationId) -> Option<&PermissionGrant> {
        if !self.state.is_connected() {
            return None;
        }
        self.grants
            .get(operation)
            .filter(|g| g.granted && g.epoch() == self.epoch)
    }

    pub fn valid_grants(&self) -> impl Iterator<Item = &PermissionGrant> {
        let connected = self.state.is_connected();
        let epoch = self.epoch;
        self.grants
            .iter()
            .filter(move |g| connected && g.granted && g.epoch() == epoch)
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected session transition");
        }
        debug!(from = %self.state, to = %next, epoch = self.epoch, "Session transition");
        self.state = next;
    }

    pub(crate) fn begin_connect(&mut self) {
        self.transition(SessionState::Connecting);
    }

    pub(crate) fn abort_connect(&mut self) {
        self.transition(SessionState::Disconnected);
    }

    /// Enter Connected with a fresh epoch. Returns the new epoch.
    pub(crate) fn establish(
        &mut self,
        link: Arc<dyn BrokerLink>,
        token: ClientToken,
        broker_version: u32,
    ) -> u64 {
        self.epoch += 1;
        self.link = Some(link);
        self.token = Some(token);
        self.broker_version = Some(broker_version);
        self.grants.clear();
        self.transition(SessionState::Connected);
        self.epoch
    }

    /// The link, when Connected over a link that is still open.
    pub(crate) fn live_link(&self) -> Option<Arc<dyn BrokerLink>> {
        if !self.state.is_connected() {
            return None;
        }
        self.link.as_ref().filter(|l| !l.is_closed()).cloned()
    }

    /// Connected, but the link has already gone away underneath us.
    pub(crate) fn link_lost(&self) -> bool {
        self.state.is_connected() && self.link.as_ref().is_none_or(|l| l.is_closed())
    }

    pub(crate) const fn grants_mut(&mut self) -> &mut GrantTable {
        &mut self.grants
    }

    /// Leave Connected (or Dead) for `next`, dropping link, token and grants.
    ///
    /// A no-op when already Disconnected.
    pub(crate) fn teardown(&mut self, next: SessionState) -> Teardown {
        if self.state == SessionState::Disconnected || self.state == next {
            return Teardown {
                link: None,
                token: None,
                grants_dropped: 0,
            };
        }
        let grants_dropped = self.grants.clear();
        let link = self.link.take();
        let token = self.token.take();
        self.broker_version = None;
        self.transition(next);
        Teardown {
            link,
            token,
            grants_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::broker::BrokerConnector;
    use crate::broker::mock::MockBroker;

    fn op(id: &str) -> OperationId {
        OperationId::new(id).unwrap()
    }

    async fn connected_session() -> Session {
        let link = MockBroker::new().connect().await.unwrap();
        let mut session = Session::new();
        session.begin_connect();
        session.establish(link, ClientToken::new("tok-1"), 1);
        session
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = ClientToken::new("abcdefgh-secret");
        assert_eq!(format!("{token:?}"), "ClientToken(abcd..)");
    }

    #[tokio::test]
    async fn establish_bumps_epoch() {
        let mut session = connected_session().await;
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.epoch(), 1);

        session.teardown(SessionState::Disconnected);
        let link = MockBroker::new().connect().await.unwrap();
        session.begin_connect();
        assert_eq!(session.establish(link, ClientToken::new("tok-2"), 1), 2);
    }

    #[tokio::test]
    async fn grant_from_older_epoch_is_invalid() {
        let mut session = connected_session().await;
        session
            .grants_mut()
            .insert(PermissionGrant::new(op("toggle-display"), 0));
        assert!(session.valid_grant(&op("toggle-display")).is_none());

        session
            .grants_mut()
            .insert(PermissionGrant::new(op("toggle-display"), 1));
        assert!(session.valid_grant(&op("toggle-display")).is_some());
        assert_eq!(session.info().grant_count, 1);
    }

    #[tokio::test]
    async fn teardown_drops_everything() {
        let mut session = connected_session().await;
        session
            .grants_mut()
            .insert(PermissionGrant::new(op("toggle-display"), 1));

        let released = session.teardown(SessionState::Dead);
        assert!(released.link.is_some());
        assert_eq!(released.token.unwrap().as_str(), "tok-1");
        assert_eq!(released.grants_dropped, 1);
        assert_eq!(session.state(), SessionState::Dead);
        assert!(session.valid_grant(&op("toggle-display")).is_none());
        assert!(session.live_link().is_none());

        let again = session.teardown(SessionState::Dead);
        assert!(again.link.is_none());

        session.teardown(SessionState::Disconnected);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn closed_link_is_detected() {
        let session = connected_session().await;
        assert!(!session.link_lost());
        session.live_link().unwrap().close().await;
        assert!(session.link_lost());
        assert!(session.live_link().is_none());
    }
}
