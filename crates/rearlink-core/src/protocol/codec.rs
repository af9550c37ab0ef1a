//! NDJSON encoding and tolerant decoding of broker messages.

use serde::Serialize;
use serde_json::Value;

use super::types::{BrokerMessage, ClientMessage};
use crate::error::{Error, Result};

const BROKER_TYPES: &[&str] = &[
    "welcome",
    "permission_result",
    "invoke_result",
    "error",
    "goodbye",
];

/// Serialize a message as one NDJSON line, newline included.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Parse a single line received from the broker.
pub fn parse_broker_line(line: &str) -> Result<BrokerMessage> {
    let raw: Value = serde_json::from_str(line.trim_end())?;
    let msg_type = message_type(&raw)?;

    if BROKER_TYPES.contains(&msg_type) {
        Ok(serde_json::from_value(raw)?)
    } else {
        Ok(BrokerMessage::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw,
        })
    }
}

/// Parse a single line received from a client. Used by broker-side code and fakes.
pub fn parse_client_line(line: &str) -> Result<ClientMessage> {
    let raw: Value = serde_json::from_str(line.trim_end())?;
    message_type(&raw)?;
    Ok(serde_json::from_value(raw)?)
}

fn message_type(raw: &Value) -> Result<&str> {
    raw.get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Protocol("Missing 'type' field".into()))
}
