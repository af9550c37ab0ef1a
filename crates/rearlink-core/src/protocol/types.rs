//! Message types for the broker NDJSON protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::OperationId;

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest broker protocol version still accepted.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Whether a broker advertising `version` can be talked to.
pub const fn is_supported_version(version: u32) -> bool {
    version >= MIN_SUPPORTED_VERSION && version <= PROTOCOL_VERSION
}

/// Error codes carried by [`BrokerMessage::Error`].
///
/// Codes not listed here are execution failures of the operation itself.
pub mod codes {
    pub const VERSION_MISMATCH: i32 = 1;
    pub const PERMISSION_DENIED: i32 = 2;
    pub const UNAUTHORIZED: i32 = 3;
    pub const UNKNOWN_OPERATION: i32 = 4;
    pub const BAD_PAYLOAD: i32 = 5;
}

/// Messages sent from the client to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake. Answered by `welcome` or `error`.
    Hello {
        request_id: String,
        protocol_version: u32,
        client_id: String,
    },
    /// Ask for a grant. The answer may take as long as the user needs.
    RequestPermission {
        request_id: String,
        operation: OperationId,
    },
    /// Abandon an outstanding `request_permission`. No reply.
    CancelPermission { request_id: String },
    /// Run a granted operation.
    Invoke {
        request_id: String,
        operation: OperationId,
        #[serde(default)]
        payload: Value,
    },
    /// Release the session. No reply.
    Release { client_token: String },
}

impl ClientMessage {
    /// Request id the broker will echo, if this message expects a reply.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Hello { request_id, .. }
            | Self::RequestPermission { request_id, .. }
            | Self::Invoke { request_id, .. } => Some(request_id),
            Self::CancelPermission { .. } | Self::Release { .. } => None,
        }
    }
}

/// Messages sent from the broker to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerMessage {
    Welcome {
        request_id: String,
        protocol_version: u32,
        client_token: String,
    },
    PermissionResult {
        request_id: String,
        operation: OperationId,
        granted: bool,
    },
    InvokeResult {
        request_id: String,
        #[serde(default)]
        output: Option<Value>,
    },
    Error {
        #[serde(default)]
        request_id: Option<String>,
        code: i32,
        #[serde(default)]
        message: String,
    },
    /// The broker is going away; the session is over.
    Goodbye {
        #[serde(default)]
        reason: String,
    },
    /// A message type this client does not know.
    #[serde(skip)]
    Unknown { msg_type: String, payload: Value },
}

impl BrokerMessage {
    /// Request id this message answers, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Welcome { request_id, .. }
            | Self::PermissionResult { request_id, .. }
            | Self::InvokeResult { request_id, .. } => Some(request_id),
            Self::Error { request_id, .. } => request_id.as_deref(),
            Self::Goodbye { .. } | Self::Unknown { .. } => None,
        }
    }
}
