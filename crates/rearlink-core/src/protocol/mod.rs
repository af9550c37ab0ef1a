//! Wire protocol spoken with the privilege broker.
//!
//! Newline-delimited JSON over a local stream socket. Every message is one
//! object tagged by `"type"`; requests carry a `request_id` that the broker
//! echoes in its reply. The reader is tolerant: unknown message types are
//! surfaced as [`BrokerMessage::Unknown`] rather than rejected.

mod codec;
mod types;

pub use codec::{encode_line, parse_broker_line, parse_client_line};
pub use types::*;
