//! Broker session subcommands: status, grant, invoke.
//!
//! User-facing output uses writeln! (this is a CLI binary, not debug output).

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use rearlink_bridge::{BridgeError, PermissionBridge};
use rearlink_core::{OperationId, OperationRequest};

/// Report whether the broker is reachable and what it negotiated.
///
/// Opens and closes its own session.
pub async fn status(
    bridge: &PermissionBridge,
    socket: &Path,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    writeln!(out, "Socket:   {}", socket.display())?;
    match bridge.connect().await {
        Ok(()) => {
            let info = bridge.session_info().await;
            let version = info
                .broker_version
                .map_or_else(|| "?".to_string(), |v| v.to_string());
            writeln!(out, "Broker:   reachable (protocol v{version})")?;
            writeln!(out, "Session:  {} (epoch {})", info.state, info.epoch)?;
            bridge.disconnect().await;
        }
        Err(BridgeError::BrokerUnavailable(reason)) => {
            writeln!(out, "Broker:   unavailable ({reason})")?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Request a grant and report it.
pub async fn grant(
    bridge: &PermissionBridge,
    operation: &str,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let operation = OperationId::new(operation)?;
    let grant = bridge
        .request_permission_with_cancel(&operation, cancel)
        .await?;
    writeln!(
        out,
        "Granted {} at {}",
        grant.operation,
        grant.granted_at.to_rfc3339()
    )?;
    Ok(())
}

/// Request a grant, invoke the operation, and print what the broker returned.
pub async fn invoke(
    bridge: &PermissionBridge,
    operation: &str,
    payload: Option<&str>,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let operation = OperationId::new(operation)?;
    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(raw).context("--payload is not valid JSON")?,
        None => json!({}),
    };
    bridge
        .request_permission_with_cancel(&operation, cancel)
        .await?;
    let outcome = bridge
        .invoke(&OperationRequest::new(operation, payload))
        .await?;
    write_output(out, outcome.output.as_ref())
}

fn write_output(out: &mut impl Write, output: Option<&Value>) -> anyhow::Result<()> {
    match output {
        None | Some(Value::Null) => {}
        Some(Value::String(text)) => {
            write!(out, "{text}")?;
            if !text.ends_with('\n') {
                writeln!(out)?;
            }
        }
        Some(other) => writeln!(out, "{}", serde_json::to_string_pretty(other)?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use rearlink_bridge::BridgeConfig;
    use rearlink_bridge::broker::mock::{ConsentPolicy, MockBroker};

    use super::*;

    fn bridge(broker: &MockBroker) -> PermissionBridge {
        PermissionBridge::new(Arc::new(broker.clone()), BridgeConfig::default())
    }

    fn op(id: &str) -> OperationId {
        OperationId::new(id).unwrap()
    }

    #[tokio::test]
    async fn status_reports_unavailable_broker() {
        let broker = MockBroker::new();
        broker.set_available(false);
        let mut out = Vec::new();
        status(&bridge(&broker), Path::new("/run/b.sock"), &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Socket:   /run/b.sock"));
        assert!(text.contains("Broker:   unavailable"));
    }

    #[tokio::test]
    async fn status_reports_session_and_releases_it() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        let mut out = Vec::new();
        status(&bridge, Path::new("/run/b.sock"), &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("reachable (protocol v1)"));
        assert!(text.contains("Session:  connected (epoch 1)"));
        assert_eq!(broker.released_tokens().len(), 1);
    }

    #[tokio::test]
    async fn invoke_prints_string_output() {
        let broker = MockBroker::new();
        broker.set_output(&op("rear-dpi-get"), json!("Physical density: 440"));
        let bridge = bridge(&broker);
        bridge.connect().await.unwrap();

        let mut out = Vec::new();
        invoke(
            &bridge,
            "rear-dpi-get",
            None,
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Physical density: 440\n");
    }

    #[tokio::test]
    async fn invoke_rejects_bad_payload_before_asking() {
        let broker = MockBroker::new();
        let bridge = bridge(&broker);
        bridge.connect().await.unwrap();

        let result = invoke(
            &bridge,
            "toggle-display",
            Some("{nope"),
            &CancellationToken::new(),
            &mut Vec::new(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(broker.permission_request_count(), 0);
    }

    #[tokio::test]
    async fn grant_surfaces_denial() {
        let broker = MockBroker::new();
        broker.set_policy(&op("move-task"), ConsentPolicy::Deny);
        let bridge = bridge(&broker);
        bridge.connect().await.unwrap();

        let err = grant(&bridge, "move-task", &CancellationToken::new(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::PermissionDenied)
        ));
    }

    #[test]
    fn structured_output_is_pretty_printed() {
        let mut out = Vec::new();
        write_output(&mut out, Some(&json!({ "ok": true }))).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"ok\": true\n}\n");
    }
}
