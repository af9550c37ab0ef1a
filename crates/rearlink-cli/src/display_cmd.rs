//! Rear-display subcommands: display-info, dpi, rotation, switch, return,
//! status-bar.
//!
//! User-facing output uses writeln! (this is a CLI binary, not debug output).

use std::io::Write;

use rearlink_bridge::display::{RearDisplay, ReturnTarget};
use rearlink_core::Rotation;

/// What the `dpi` subcommand should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiAction {
    Show,
    Set(u32),
    Reset,
}

pub async fn info(display: &RearDisplay<'_>, out: &mut impl Write) -> anyhow::Result<()> {
    let info = display.info().await?;
    writeln!(out, "Display {}", display.display_id())?;
    writeln!(out, "  Resolution: {} x {}", info.width, info.height)?;
    writeln!(out, "  Density:    {} dpi", info.density_dpi)?;
    if info.cutout.has_cutout() {
        let c = info.cutout;
        writeln!(
            out,
            "  Cutout:     left {} top {} right {} bottom {}",
            c.left, c.top, c.right, c.bottom
        )?;
    } else {
        writeln!(out, "  Cutout:     none")?;
    }
    Ok(())
}

pub async fn dpi(
    display: &RearDisplay<'_>,
    action: DpiAction,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        DpiAction::Show => match display.dpi().await? {
            Some(dpi) => writeln!(out, "{dpi}")?,
            None => writeln!(out, "unknown")?,
        },
        DpiAction::Set(dpi) => {
            display.set_dpi(dpi).await?;
            writeln!(out, "Rear density set to {dpi}")?;
        }
        DpiAction::Reset => {
            display.reset_dpi().await?;
            writeln!(out, "Rear density reset")?;
        }
    }
    Ok(())
}

/// Show the rotation, or lock it to `value` quarter turns.
pub async fn rotation(
    display: &RearDisplay<'_>,
    value: Option<u8>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match value {
        None => match display.rotation().await? {
            Some(rotation) => writeln!(out, "locked {}°", rotation.degrees())?,
            None => writeln!(out, "free")?,
        },
        Some(value) => {
            let rotation = Rotation::try_from(value)?;
            display.set_rotation(rotation).await?;
            writeln!(
                out,
                "Display {} locked at {}°",
                display.display_id(),
                rotation.degrees()
            )?;
        }
    }
    Ok(())
}

/// Move the front app onto the display.
pub async fn switch(display: &RearDisplay<'_>, out: &mut impl Write) -> anyhow::Result<()> {
    match display.switch_foreground().await? {
        Some(task) => writeln!(out, "Moved {task} to display {}", display.display_id())?,
        None => writeln!(out, "No foreground app to move")?,
    }
    Ok(())
}

/// Send a task on the display back to the main display.
pub async fn return_task(
    display: &RearDisplay<'_>,
    target: ReturnTarget,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match display.return_task(target).await? {
        Some(task) => writeln!(out, "Returned {task} to the main display")?,
        None => writeln!(out, "Nothing to return from display {}", display.display_id())?,
    }
    Ok(())
}

pub async fn status_bar(
    display: &RearDisplay<'_>,
    to_main: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if to_main {
        display.status_bar_to_main().await?;
        writeln!(out, "Status bar pinned to the main display")?;
    } else {
        display.collapse_status_bar().await?;
        writeln!(out, "Status bar collapsed")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use rearlink_bridge::broker::mock::MockBroker;
    use rearlink_bridge::{BridgeConfig, PermissionBridge};
    use rearlink_core::OperationId;
    use rearlink_core::protocol::ClientMessage;
    use serde_json::json;

    use super::*;

    async fn connected(broker: &MockBroker) -> PermissionBridge {
        let bridge = PermissionBridge::new(Arc::new(broker.clone()), BridgeConfig::default());
        bridge.connect().await.unwrap();
        bridge
    }

    fn op(id: &str) -> OperationId {
        OperationId::new(id).unwrap()
    }

    #[tokio::test]
    async fn info_prints_geometry() {
        let broker = MockBroker::new();
        broker.set_output(
            &op("display-dump"),
            json!(
                "mViewports=[DisplayViewport{displayId=1, uniqueId='local:9', deviceWidth=904, deviceHeight=572}]\n  DisplayDeviceInfo{\"Rear\": uniqueId=\"local:9\", 904 x 572, density 450, DisplayCutout{insets=Rect(296, 0 - 0, 0)}\n"
            ),
        );
        let bridge = connected(&broker).await;
        let mut out = Vec::new();
        info(&RearDisplay::new(&bridge, 1), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Resolution: 904 x 572"));
        assert!(text.contains("Density:    450 dpi"));
        assert!(text.contains("left 296 top 0 right 0 bottom 0"));
    }

    #[tokio::test]
    async fn dpi_set_sends_value() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;
        let mut out = Vec::new();
        dpi(&RearDisplay::new(&bridge, 1), DpiAction::Set(320), &mut out)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Rear density set to 320\n");
        let payload = broker.messages().into_iter().find_map(|m| match m {
            ClientMessage::Invoke { payload, .. } => Some(payload),
            _ => None,
        });
        assert_eq!(payload, Some(json!({ "dpi": 320 })));
    }

    #[tokio::test]
    async fn rotation_shows_free() {
        let broker = MockBroker::new();
        broker.set_output(&op("rotation-get"), json!("free\n"));
        let bridge = connected(&broker).await;
        let mut out = Vec::new();
        rotation(&RearDisplay::new(&bridge, 1), None, &mut out)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "free\n");
    }

    #[tokio::test]
    async fn rotation_out_of_range_is_rejected_locally() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;
        let result = rotation(&RearDisplay::new(&bridge, 1), Some(4), &mut Vec::new()).await;
        assert!(result.is_err());
        assert_eq!(broker.permission_request_count(), 0);
    }

    #[tokio::test]
    async fn switch_reports_moved_task() {
        let broker = MockBroker::new();
        broker.set_output(&op("foreground-app"), json!("com.android.camera:1434"));
        let bridge = connected(&broker).await;
        let mut out = Vec::new();
        switch(&RearDisplay::new(&bridge, 1), &mut out).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Moved com.android.camera:1434 to display 1\n"
        );
    }

    #[tokio::test]
    async fn switch_onto_busy_display_fails() {
        let broker = MockBroker::new();
        broker.set_output(&op("foreground-on-display"), json!("com.tencent.mm:88"));
        broker.set_output(&op("foreground-app"), json!("com.android.camera:1434"));
        let bridge = connected(&broker).await;

        let err = switch(&RearDisplay::new(&bridge, 1), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already showing com.tencent.mm:88"));
    }

    #[tokio::test]
    async fn return_by_package_reports_task() {
        let broker = MockBroker::new();
        broker.set_output(&op("foreground-on-display"), json!("com.android.camera:1434"));
        broker.set_output(&op("task-on-display"), json!(true));
        let bridge = connected(&broker).await;
        let mut out = Vec::new();
        return_task(
            &RearDisplay::new(&bridge, 1),
            ReturnTarget::Package("com.android.camera".into()),
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Returned com.android.camera:1434 to the main display\n"
        );
    }

    #[tokio::test]
    async fn return_with_empty_display_says_so() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;
        let mut out = Vec::new();
        return_task(&RearDisplay::new(&bridge, 1), ReturnTarget::Current, &mut out)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Nothing to return from display 1\n"
        );
    }

    #[tokio::test]
    async fn status_bar_defaults_to_collapse() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;
        let mut out = Vec::new();
        status_bar(&RearDisplay::new(&bridge, 1), false, &mut out)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Status bar collapsed\n");
        assert!(broker.messages().iter().any(|m| matches!(
            m,
            ClientMessage::Invoke { operation, .. } if operation.as_str() == "status-bar-collapse"
        )));
    }
}
