//! Bridge and transport error types.

/// Errors surfaced to callers of the permission bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The broker is not installed or not running.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The broker speaks a protocol version this client cannot use.
    #[error(
        "Broker protocol version mismatch: client speaks {client}, broker {}",
        .broker.map_or_else(|| "rejected the handshake".to_string(), |v| format!("speaks {v}"))
    )]
    VersionMismatch { client: u32, broker: Option<u32> },

    #[error("No active broker session")]
    NotConnected,

    /// The user or broker policy refused the grant.
    #[error("Permission denied by broker")]
    PermissionDenied,

    /// No valid grant for the requested operation.
    #[error("Operation not authorized")]
    Unauthorized,

    /// The session died while a call was in flight.
    #[error("Broker disconnected")]
    BrokerDisconnected,

    /// The broker ran the operation and reported a failure code.
    #[error("Operation failed with broker code {0}")]
    OperationFailed(i32),

    /// A user app already holds the target display.
    #[error("Display {display_id} is already showing {occupant}")]
    DisplayOccupied { display_id: u32, occupant: String },

    /// The caller abandoned a pending permission request.
    #[error("Permission request cancelled")]
    Cancelled,

    /// The broker sent something that does not fit the conversation.
    #[error("Broker protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Core(#[from] rearlink_core::Error),
}

/// Errors from a single broker link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Could not reach the broker at all.
    #[error("Broker unreachable: {0}")]
    Unavailable(String),

    /// Writing to the broker failed; the request was not delivered.
    #[error("Broker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link closed before a reply arrived.
    #[error("Broker link closed")]
    Closed,

    /// No reply within the allotted time.
    #[error("Broker did not reply in time")]
    Timeout,

    #[error("Broker protocol error: {0}")]
    Protocol(String),
}

impl From<rearlink_core::Error> for LinkError {
    fn from(e: rearlink_core::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
