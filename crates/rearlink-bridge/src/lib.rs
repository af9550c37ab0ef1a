//! rearlink Permission Bridge
//!
//! Client side of the privilege broker:
//! - Session negotiation and lifecycle (one session per bridge)
//! - Permission grants scoped to a live session
//! - Cancellable consent requests
//! - Invocation of restricted operations through the broker
//! - Unix-socket NDJSON transport and an in-memory mock broker

pub mod broker;
pub mod client;
pub mod config;
pub mod display;
pub mod error;
pub mod permission;
pub mod session;

pub use client::{InvokeOutcome, PermissionBridge};
pub use config::{BridgeConfig, RetryPolicy};
pub use error::{BridgeError, LinkError};
pub use permission::PermissionGrant;
pub use session::{SessionInfo, SessionState};
