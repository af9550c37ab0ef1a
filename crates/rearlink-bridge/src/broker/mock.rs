//! In-memory scriptable broker.
//!
//! Answers the same conversation a real broker would, with knobs for
//! availability, consent decisions, invocation results and failures.
//! Every message it receives is recorded for assertions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use rearlink_core::OperationId;
use rearlink_core::protocol::{BrokerMessage, ClientMessage, PROTOCOL_VERSION, codes};

use super::{BrokerConnector, BrokerLink};
use crate::error::LinkError;

/// How the mock answers a consent request for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentPolicy {
    Grant,
    Deny,
    /// Leave the request waiting until [`MockBroker::resolve_held`].
    Hold,
}

struct HeldConsent {
    link_id: u64,
    request_id: String,
    operation: OperationId,
    reply: oneshot::Sender<BrokerMessage>,
}

struct MockState {
    available: bool,
    protocol_version: u32,
    handshake_error: Option<i32>,
    default_policy: ConsentPolicy,
    policies: HashMap<OperationId, ConsentPolicy>,
    outputs: HashMap<OperationId, Value>,
    failures: HashMap<OperationId, i32>,
    revoked: HashSet<OperationId>,
    stall_invokes: bool,
    failing_writes: u32,
    messages: Vec<ClientMessage>,
    held: Vec<HeldConsent>,
    links: HashMap<u64, Arc<watch::Sender<bool>>>,
    next_link_id: u64,
    connects: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            available: true,
            protocol_version: PROTOCOL_VERSION,
            handshake_error: None,
            default_policy: ConsentPolicy::Grant,
            policies: HashMap::new(),
            outputs: HashMap::new(),
            failures: HashMap::new(),
            revoked: HashSet::new(),
            stall_invokes: false,
            failing_writes: 0,
            messages: Vec::new(),
            held: Vec::new(),
            links: HashMap::new(),
            next_link_id: 0,
            connects: 0,
        }
    }
}

/// Scriptable broker shared between a test and the bridge under test.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether new connections succeed.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Version advertised in `welcome`.
    pub fn set_protocol_version(&self, version: u32) {
        self.lock().protocol_version = version;
    }

    /// Answer the handshake with an error carrying `code`.
    pub fn reject_handshake(&self, code: i32) {
        self.lock().handshake_error = Some(code);
    }

    pub fn set_default_policy(&self, policy: ConsentPolicy) {
        self.lock().default_policy = policy;
    }

    pub fn set_policy(&self, operation: &OperationId, policy: ConsentPolicy) {
        self.lock().policies.insert(operation.clone(), policy);
    }

    /// Output returned by successful invocations of `operation`.
    pub fn set_output(&self, operation: &OperationId, output: Value) {
        self.lock().outputs.insert(operation.clone(), output);
    }

    /// Make invocations of `operation` fail with `code`.
    pub fn fail_invoke(&self, operation: &OperationId, code: i32) {
        self.lock().failures.insert(operation.clone(), code);
    }

    /// Broker-side revocation: invocations answer UNAUTHORIZED.
    pub fn revoke(&self, operation: &OperationId) {
        self.lock().revoked.insert(operation.clone());
    }

    /// Never answer invocations.
    pub fn stall_invokes(&self, stall: bool) {
        self.lock().stall_invokes = stall;
    }

    /// Fail the next `count` writes from any link with an I/O error.
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    /// Answer the oldest held consent request for `operation`.
    pub fn resolve_held(&self, operation: &OperationId, granted: bool) -> bool {
        let held = {
            let mut state = self.lock();
            let Some(pos) = state.held.iter().position(|h| &h.operation == operation) else {
                return false;
            };
            state.held.remove(pos)
        };
        held.reply
            .send(BrokerMessage::PermissionResult {
                request_id: held.request_id,
                operation: held.operation,
                granted,
            })
            .is_ok()
    }

    pub fn held_count(&self) -> usize {
        self.lock().held.len()
    }

    /// Send an error with no request id to every waiting call and close
    /// every link, as a broker does when it gives up on a session.
    pub fn fail_session(&self, code: i32) {
        let mut state = self.lock();
        for held in state.held.drain(..) {
            let _ = held.reply.send(BrokerMessage::Error {
                request_id: None,
                code,
                message: "session failed".into(),
            });
        }
        for closed in state.links.values() {
            closed.send_replace(true);
        }
        state.links.clear();
    }

    /// Close every open link, as if the broker process died.
    pub fn kill(&self) {
        let mut state = self.lock();
        state.held.clear();
        for closed in state.links.values() {
            closed.send_replace(true);
        }
        state.links.clear();
    }

    pub fn messages(&self) -> Vec<ClientMessage> {
        self.lock().messages.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn invocation_count(&self) -> usize {
        self.lock()
            .messages
            .iter()
            .filter(|m| matches!(m, ClientMessage::Invoke { .. }))
            .count()
    }

    pub fn permission_request_count(&self) -> usize {
        self.lock()
            .messages
            .iter()
            .filter(|m| matches!(m, ClientMessage::RequestPermission { .. }))
            .count()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.lock()
            .messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::CancelPermission { request_id } => Some(request_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn released_tokens(&self) -> Vec<String> {
        self.lock()
            .messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Release { client_token } => Some(client_token.clone()),
                _ => None,
            })
            .collect()
    }

    /// Poll `cond` for up to two seconds. Returns whether it became true.
    pub async fn wait_for(&self, cond: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..400 {
            if cond(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond(self)
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerLink>, LinkError> {
        let mut state = self.lock();
        state.connects += 1;
        if !state.available {
            return Err(LinkError::Unavailable("mock broker is offline".into()));
        }
        state.next_link_id += 1;
        let id = state.next_link_id;
        let (closed_tx, _) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        state.links.insert(id, Arc::clone(&closed_tx));
        debug!(link_id = id, "Mock broker accepted link");
        Ok(Arc::new(MockLink {
            id,
            broker: self.clone(),
            closed_tx,
        }))
    }
}

/// One link to a [`MockBroker`].
pub struct MockLink {
    id: u64,
    broker: MockBroker,
    closed_tx: Arc<watch::Sender<bool>>,
}

impl MockLink {
    /// Record an outgoing message, honouring scripted write failures.
    fn write(&self, message: &ClientMessage) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        let mut state = self.broker.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        state.messages.push(message.clone());
        if let ClientMessage::CancelPermission { request_id } = message {
            state.held.retain(|h| &h.request_id != request_id);
        }
        Ok(())
    }

    async fn wait_or_closed(
        &self,
        rx: oneshot::Receiver<BrokerMessage>,
    ) -> Result<BrokerMessage, LinkError> {
        tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| LinkError::Closed),
            () = self.closed() => Err(LinkError::Closed),
        }
    }

    fn answer_hello(&self, request_id: String) -> BrokerMessage {
        let state = self.broker.lock();
        match state.handshake_error {
            Some(code) => BrokerMessage::Error {
                request_id: Some(request_id),
                code,
                message: "handshake rejected".into(),
            },
            None => BrokerMessage::Welcome {
                request_id,
                protocol_version: state.protocol_version,
                client_token: format!("mock-token-{}", self.id),
            },
        }
    }

    fn answer_invoke(&self, request_id: String, operation: &OperationId) -> BrokerMessage {
        let state = self.broker.lock();
        let code = if state.revoked.contains(operation) {
            Some(codes::UNAUTHORIZED)
        } else {
            state.failures.get(operation).copied()
        };
        match code {
            Some(code) => BrokerMessage::Error {
                request_id: Some(request_id),
                code,
                message: format!("{operation} failed"),
            },
            None => BrokerMessage::InvokeResult {
                request_id,
                output: state.outputs.get(operation).cloned(),
            },
        }
    }
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn send(&self, message: ClientMessage) -> Result<(), LinkError> {
        self.write(&message)
    }

    async fn call(&self, request: ClientMessage) -> Result<BrokerMessage, LinkError> {
        self.write(&request)?;
        match request {
            ClientMessage::Hello { request_id, .. } => Ok(self.answer_hello(request_id)),
            ClientMessage::RequestPermission {
                request_id,
                operation,
            } => {
                let policy = {
                    let state = self.broker.lock();
                    state
                        .policies
                        .get(&operation)
                        .copied()
                        .unwrap_or(state.default_policy)
                };
                match policy {
                    ConsentPolicy::Grant | ConsentPolicy::Deny => {
                        Ok(BrokerMessage::PermissionResult {
                            request_id,
                            operation,
                            granted: policy == ConsentPolicy::Grant,
                        })
                    }
                    ConsentPolicy::Hold => {
                        let (tx, rx) = oneshot::channel();
                        self.broker.lock().held.push(HeldConsent {
                            link_id: self.id,
                            request_id,
                            operation,
                            reply: tx,
                        });
                        self.wait_or_closed(rx).await
                    }
                }
            }
            ClientMessage::Invoke {
                request_id,
                operation,
                ..
            } => {
                if self.broker.lock().stall_invokes {
                    self.closed().await;
                    return Err(LinkError::Closed);
                }
                Ok(self.answer_invoke(request_id, &operation))
            }
            ClientMessage::CancelPermission { .. } | ClientMessage::Release { .. } => {
                Err(LinkError::Protocol("message expects no reply".into()))
            }
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn close(&self) {
        self.closed_tx.send_replace(true);
        let mut state = self.broker.lock();
        state.held.retain(|h| h.link_id != self.id);
        state.links.remove(&self.id);
    }
}
