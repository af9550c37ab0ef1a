//! The permission bridge.
//!
//! [`PermissionBridge`] owns the single broker session of a process. All
//! state changes happen under one session lock. Consent waits are the
//! exception: they run outside the lock so a user taking their time does
//! not block `disconnect`, and a grant only lands if the session it was
//! requested in is still the live one.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rearlink_core::protocol::{
    BrokerMessage, ClientMessage, PROTOCOL_VERSION, codes, is_supported_version,
};
use rearlink_core::{OperationId, OperationRequest};

use crate::broker::{BrokerConnector, BrokerLink};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, LinkError};
use crate::permission::{PendingManager, PermissionGrant};
use crate::session::{ClientToken, Session, SessionInfo, SessionState};

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeOutcome {
    pub operation: OperationId,
    /// Whatever the broker returned, typically command output.
    pub output: Option<Value>,
}

impl InvokeOutcome {
    /// Output as text, when the broker returned a string.
    pub fn output_str(&self) -> Option<&str> {
        self.output.as_ref()?.as_str()
    }
}

/// Client of the privilege broker.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PermissionBridge {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn BrokerConnector>,
    config: BridgeConfig,
    session: Mutex<Session>,
    pending: Arc<PendingManager>,
    /// Stops link watchers once the bridge is gone.
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

impl PermissionBridge {
    pub fn new(connector: Arc<dyn BrokerConnector>, config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                session: Mutex::new(Session::new()),
                pending: Arc::new(PendingManager::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Bridge to the broker socket named in `settings`.
    #[cfg(unix)]
    pub fn unix(settings: &rearlink_core::config::BrokerSettings) -> Self {
        let connector = crate::broker::UnixBrokerConnector::new(settings.resolved_socket_path());
        Self::new(Arc::new(connector), BridgeConfig::from(settings))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> SessionState {
        self.inner.session.lock().await.state()
    }

    pub async fn session_info(&self) -> SessionInfo {
        self.inner.session.lock().await.info()
    }

    /// Grants valid in the current session, ordered by operation.
    pub async fn grants(&self) -> Vec<PermissionGrant> {
        let session = self.inner.session.lock().await;
        let mut grants: Vec<_> = session.valid_grants().cloned().collect();
        grants.sort_by(|a, b| a.operation.cmp(&b.operation));
        grants
    }

    /// Consent requests still waiting on the broker.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.count()
    }

    /// Open a session with the broker.
    ///
    /// A no-op when already connected. A `Dead` session must be
    /// disconnected first.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        let mut session = self.inner.session.lock().await;
        match session.state() {
            SessionState::Connected if !session.link_lost() => {
                debug!(epoch = session.epoch(), "Already connected to broker");
                return Ok(());
            }
            SessionState::Connected => {
                info!("Broker link was lost; reconnecting");
                self.inner
                    .invalidate(&mut session, SessionState::Disconnected)
                    .await;
            }
            SessionState::Dead => return Err(BridgeError::BrokerDisconnected),
            SessionState::Connecting => {
                debug!("Recovering from an abandoned connect");
                session.abort_connect();
            }
            SessionState::Disconnected => {}
        }

        session.begin_connect();
        let handshake =
            tokio::time::timeout(self.inner.config.connect_timeout, self.inner.handshake()).await;
        match handshake {
            Ok(Ok((link, token, version))) => {
                let epoch = session.establish(Arc::clone(&link), token, version);
                info!(epoch, broker_version = version, "Broker session established");
                self.spawn_watcher(link, epoch);
                Ok(())
            }
            Ok(Err(e)) => {
                session.abort_connect();
                warn!(error = %e, "Broker handshake failed");
                Err(e)
            }
            Err(_) => {
                session.abort_connect();
                warn!(
                    timeout = ?self.inner.config.connect_timeout,
                    "Broker handshake timed out"
                );
                Err(BridgeError::BrokerUnavailable(
                    "handshake timed out".to_string(),
                ))
            }
        }
    }

    /// Watch the link and invalidate the session if the broker goes away.
    fn spawn_watcher(&self, link: Arc<dyn BrokerLink>, epoch: u64) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = link.closed() => {}
                () = shutdown.cancelled() => {
                    link.close().await;
                    return;
                }
            }
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut session = inner.session.lock().await;
            if session.epoch() == epoch && session.state().is_connected() {
                warn!(epoch, "Broker link closed; session invalidated");
                inner
                    .invalidate(&mut session, SessionState::Disconnected)
                    .await;
            }
        });
    }

    /// Ask the broker to authorize `operation`.
    ///
    /// May wait as long as the user takes to decide. Dropping the returned
    /// future withdraws the request from the broker. A grant already held
    /// in this session is returned without asking again.
    pub async fn request_permission(
        &self,
        operation: &OperationId,
    ) -> Result<PermissionGrant, BridgeError> {
        let (link, epoch) = {
            let session = self.inner.session.lock().await;
            if !session.state().is_connected() {
                return Err(BridgeError::NotConnected);
            }
            if let Some(grant) = session.valid_grant(operation) {
                debug!(operation = %operation, "Reusing grant from this session");
                return Ok(grant.clone());
            }
            let link = session
                .live_link()
                .ok_or(BridgeError::BrokerDisconnected)?;
            (link, session.epoch())
        };

        let request_id = new_request_id();
        let guard = self.inner.pending.register(
            request_id.clone(),
            operation.clone(),
            epoch,
            Arc::clone(&link),
        );
        info!(request_id = %request_id, operation = %operation, "Requesting permission");

        let reply = self
            .inner
            .call_with_retry(
                &link,
                || ClientMessage::RequestPermission {
                    request_id: request_id.clone(),
                    operation: operation.clone(),
                },
                None,
            )
            .await;

        // A grant stays pending until it is committed, so a caller that
        // gives up while the commit waits on the session lock still
        // withdraws it from the broker.
        let uncommitted = match &reply {
            Ok(BrokerMessage::PermissionResult {
                granted: true,
                operation: answered,
                ..
            }) if answered == operation => Some(guard),
            _ => {
                if guard.settle().is_none() {
                    debug!(request_id = %request_id, "Consent request was withdrawn while waiting");
                }
                None
            }
        };

        match reply {
            Ok(BrokerMessage::PermissionResult {
                operation: answered,
                ..
            }) if &answered != operation => Err(BridgeError::Protocol(format!(
                "asked for {operation}, broker answered for {answered}"
            ))),
            Ok(BrokerMessage::PermissionResult { granted: true, .. }) => {
                let result = self.inner.commit_grant(operation, epoch).await;
                if let Some(guard) = uncommitted {
                    guard.settle();
                }
                result
            }
            Ok(BrokerMessage::Error {
                request_id: None,
                code,
                message,
            }) => {
                warn!(operation = %operation, code, message = %message, "Broker failed the session");
                let mut session = self.inner.session.lock().await;
                Err(self
                    .inner
                    .on_link_failure(&mut session, epoch, &LinkError::Closed)
                    .await)
            }
            Ok(
                BrokerMessage::PermissionResult { granted: false, .. }
                | BrokerMessage::Error {
                    code: codes::PERMISSION_DENIED,
                    ..
                },
            ) => {
                info!(operation = %operation, "Permission denied");
                Err(BridgeError::PermissionDenied)
            }
            Ok(BrokerMessage::Error { code, message, .. }) => {
                warn!(operation = %operation, code, message = %message, "Permission request failed");
                Err(BridgeError::OperationFailed(code))
            }
            Ok(other) => Err(BridgeError::Protocol(format!(
                "unexpected reply to permission request: {other:?}"
            ))),
            Err(e) => {
                let mut session = self.inner.session.lock().await;
                Err(self.inner.on_link_failure(&mut session, epoch, &e).await)
            }
        }
    }

    /// [`request_permission`](Self::request_permission) that gives up when
    /// `cancel` fires.
    ///
    /// On cancellation the broker is told to drop the request, no grant is
    /// recorded, and the session is left as it was.
    pub async fn request_permission_with_cancel(
        &self,
        operation: &OperationId,
        cancel: &CancellationToken,
    ) -> Result<PermissionGrant, BridgeError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!(operation = %operation, "Permission request cancelled by caller");
                Err(BridgeError::Cancelled)
            }
            result = self.request_permission(operation) => result,
        }
    }

    /// Run a granted operation through the broker.
    ///
    /// Without a valid grant for `request.operation` this fails with
    /// `Unauthorized` and nothing is sent.
    pub async fn invoke(&self, request: &OperationRequest) -> Result<InvokeOutcome, BridgeError> {
        let operation = &request.operation;
        let mut session = self.inner.session.lock().await;
        if session.valid_grant(operation).is_none() {
            debug!(operation = %operation, state = %session.state(), "No valid grant");
            return Err(BridgeError::Unauthorized);
        }
        let Some(link) = session.live_link() else {
            self.inner
                .invalidate(&mut session, SessionState::Disconnected)
                .await;
            return Err(BridgeError::BrokerDisconnected);
        };
        let epoch = session.epoch();

        let request_id = new_request_id();
        info!(request_id = %request_id, operation = %operation, "Invoking operation");
        let reply = self
            .inner
            .call_with_retry(
                &link,
                || ClientMessage::Invoke {
                    request_id: request_id.clone(),
                    operation: operation.clone(),
                    payload: request.payload.clone(),
                },
                Some(self.inner.config.invoke_timeout),
            )
            .await;

        match reply {
            Ok(BrokerMessage::InvokeResult { output, .. }) => {
                debug!(request_id = %request_id, "Invocation succeeded");
                Ok(InvokeOutcome {
                    operation: operation.clone(),
                    output,
                })
            }
            Ok(BrokerMessage::Error {
                request_id: None,
                code,
                message,
            }) => {
                warn!(operation = %operation, code, message = %message, "Broker failed the session");
                Err(self
                    .inner
                    .on_link_failure(&mut session, epoch, &LinkError::Closed)
                    .await)
            }
            Ok(BrokerMessage::Error {
                code: codes::UNAUTHORIZED,
                ..
            }) => {
                warn!(operation = %operation, "Broker no longer honours grant; revoking");
                session.grants_mut().revoke(operation);
                Err(BridgeError::Unauthorized)
            }
            Ok(BrokerMessage::Error { code, message, .. }) => {
                warn!(operation = %operation, code, message = %message, "Operation failed");
                Err(BridgeError::OperationFailed(code))
            }
            Ok(other) => Err(BridgeError::Protocol(format!(
                "unexpected reply to invoke: {other:?}"
            ))),
            Err(e) => Err(self.inner.on_link_failure(&mut session, epoch, &e).await),
        }
    }

    /// End the session: withdraw pending consent requests, release the
    /// client token, and drop every grant. Idempotent.
    pub async fn disconnect(&self) {
        let mut session = self.inner.session.lock().await;
        if session.state() == SessionState::Disconnected {
            debug!("Already disconnected");
            return;
        }

        let released = session.teardown(SessionState::Disconnected);
        let abandoned = self.inner.pending.drain();
        if let Some(link) = released.link {
            if !link.is_closed() {
                let farewell = async {
                    for consent in &abandoned {
                        let cancel = ClientMessage::CancelPermission {
                            request_id: consent.request_id.clone(),
                        };
                        if let Err(e) = link.send(cancel).await {
                            debug!(request_id = %consent.request_id, error = %e, "Cancel not delivered");
                        }
                    }
                    if let Some(token) = &released.token {
                        let release = ClientMessage::Release {
                            client_token: token.as_str().to_string(),
                        };
                        if let Err(e) = link.send(release).await {
                            debug!(error = %e, "Release not delivered");
                        }
                    }
                };
                if tokio::time::timeout(self.inner.config.connect_timeout, farewell)
                    .await
                    .is_err()
                {
                    warn!("Broker did not accept release in time");
                }
            }
            link.close().await;
        }
        info!(
            grants = released.grants_dropped,
            cancelled = abandoned.len(),
            "Disconnected from broker"
        );
    }
}

impl Inner {
    /// Open a link and negotiate the protocol.
    async fn handshake(&self) -> Result<(Arc<dyn BrokerLink>, ClientToken, u32), BridgeError> {
        let link = self.connector.connect().await.map_err(|e| match e {
            LinkError::Unavailable(msg) => BridgeError::BrokerUnavailable(msg),
            other => BridgeError::BrokerUnavailable(other.to_string()),
        })?;

        let hello = ClientMessage::Hello {
            request_id: new_request_id(),
            protocol_version: PROTOCOL_VERSION,
            client_id: self.config.client_id.clone(),
        };
        let reply = match link.call(hello).await {
            Ok(reply) => reply,
            Err(e) => {
                link.close().await;
                return Err(BridgeError::BrokerUnavailable(e.to_string()));
            }
        };

        let result = match reply {
            BrokerMessage::Welcome {
                protocol_version,
                client_token,
                ..
            } if is_supported_version(protocol_version) => {
                return Ok((link, ClientToken::new(client_token), protocol_version));
            }
            BrokerMessage::Welcome {
                protocol_version,
                client_token,
                ..
            } => {
                warn!(
                    client = PROTOCOL_VERSION,
                    broker = protocol_version,
                    "Unsupported broker protocol version"
                );
                if let Err(e) = link.send(ClientMessage::Release { client_token }).await {
                    debug!(error = %e, "Release not delivered");
                }
                Err(BridgeError::VersionMismatch {
                    client: PROTOCOL_VERSION,
                    broker: Some(protocol_version),
                })
            }
            BrokerMessage::Error {
                code: codes::VERSION_MISMATCH,
                ..
            } => Err(BridgeError::VersionMismatch {
                client: PROTOCOL_VERSION,
                broker: None,
            }),
            BrokerMessage::Error { code, message, .. } => Err(BridgeError::BrokerUnavailable(
                format!("handshake refused with code {code}: {message}"),
            )),
            other => Err(BridgeError::Protocol(format!(
                "unexpected handshake reply: {other:?}"
            ))),
        };
        link.close().await;
        result
    }

    /// Call `link`, retrying only writes that never reached the broker.
    async fn call_with_retry(
        &self,
        link: &Arc<dyn BrokerLink>,
        make_request: impl Fn() -> ClientMessage,
        deadline: Option<Duration>,
    ) -> Result<BrokerMessage, LinkError> {
        let mut attempt = 0;
        loop {
            let call = link.call(make_request());
            let result = match deadline {
                Some(deadline) => tokio::time::timeout(deadline, call)
                    .await
                    .unwrap_or(Err(LinkError::Timeout)),
                None => call.await,
            };
            match result {
                Err(LinkError::Io(e)) if self.config.retry.should_retry(attempt) => {
                    attempt += 1;
                    warn!(error = %e, attempt, "Broker write failed; retrying");
                    tokio::time::sleep(self.config.retry.delay).await;
                }
                other => return other,
            }
        }
    }

    /// Record a grant, unless the session it was asked in has ended.
    async fn commit_grant(
        &self,
        operation: &OperationId,
        epoch: u64,
    ) -> Result<PermissionGrant, BridgeError> {
        let mut session = self.session.lock().await;
        if session.epoch() != epoch || !session.state().is_connected() {
            info!(operation = %operation, "Grant arrived after its session ended");
            return Err(BridgeError::BrokerDisconnected);
        }
        let grant = PermissionGrant::new(operation.clone(), epoch);
        session.grants_mut().insert(grant.clone());
        info!(operation = %operation, epoch, "Permission granted");
        Ok(grant)
    }

    /// Tear the session down after a failed call and map the failure.
    ///
    /// A closed link means the broker went away cleanly. Anything else
    /// leaves the link in an unknown state and the session becomes `Dead`.
    async fn on_link_failure(
        &self,
        session: &mut Session,
        epoch: u64,
        error: &LinkError,
    ) -> BridgeError {
        if session.epoch() == epoch && session.state().is_connected() {
            let next = match error {
                LinkError::Closed => SessionState::Disconnected,
                _ => SessionState::Dead,
            };
            warn!(error = %error, state = %next, "Broker call failed");
            self.invalidate(session, next).await;
        } else {
            debug!(error = %error, "Broker call failed after its session ended");
        }
        BridgeError::BrokerDisconnected
    }

    /// Leave the Connected state, dropping grants and pending requests.
    async fn invalidate(&self, session: &mut Session, next: SessionState) {
        let released = session.teardown(next);
        let abandoned = self.pending.drain();
        if released.grants_dropped > 0 || !abandoned.is_empty() {
            info!(
                grants = released.grants_dropped,
                pending = abandoned.len(),
                state = %next,
                "Session invalidated"
            );
        }
        if let Some(link) = released.link {
            link.close().await;
        }
    }
}
