//! Rear-display helpers on top of the bridge.
//!
//! Each call asks for the operation's grant (reusing one already held in
//! this session), invokes it, and parses whatever text the broker returns.

use serde_json::Value;
use tracing::{info, warn};

use rearlink_core::display::{RearDisplayInfo, parse_density, parse_display_dump, parse_rotation};
use rearlink_core::task::{MAIN_DISPLAY_ID, parse_flag, parse_task_id, parse_task_ref};
use rearlink_core::{RearOperation, Rotation, TaskRef};

use crate::client::{InvokeOutcome, PermissionBridge};
use crate::error::BridgeError;

/// Which task [`RearDisplay::return_task`] sends back to the main display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnTarget {
    /// Whatever is on top of the display.
    Current,
    Task(i32),
    /// The top task, if it belongs to this package.
    Package(String),
}

/// One display driven through a [`PermissionBridge`].
pub struct RearDisplay<'a> {
    bridge: &'a PermissionBridge,
    display_id: u32,
}

impl<'a> RearDisplay<'a> {
    pub const fn new(bridge: &'a PermissionBridge, display_id: u32) -> Self {
        Self { bridge, display_id }
    }

    pub const fn display_id(&self) -> u32 {
        self.display_id
    }

    async fn run(&self, operation: RearOperation) -> Result<InvokeOutcome, BridgeError> {
        let request = operation.to_request()?;
        self.bridge.request_permission(&request.operation).await?;
        self.bridge.invoke(&request).await
    }

    /// Output as text; scalar JSON answers are rendered as their literal.
    async fn run_text(&self, operation: RearOperation) -> Result<String, BridgeError> {
        let outcome = self.run(operation).await?;
        Ok(match outcome.output {
            Some(Value::String(text)) => text,
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        })
    }

    /// Flip the vendor sub-screen launcher. Failure only costs polish, so it
    /// is logged and swallowed.
    async fn set_sub_launcher(&self, enabled: bool) {
        if let Err(e) = self.run(RearOperation::SubLauncher { enabled }).await {
            warn!(enabled, error = %e, "Could not switch the sub-screen launcher");
        }
    }

    /// Geometry of this display, with defaults for anything the dump lacks.
    pub async fn info(&self) -> Result<RearDisplayInfo, BridgeError> {
        let dump = self.run_text(RearOperation::DisplayDump).await?;
        Ok(parse_display_dump(&dump, self.display_id))
    }

    /// Effective density of the rear display.
    pub async fn dpi(&self) -> Result<Option<u32>, BridgeError> {
        let output = self.run_text(RearOperation::GetRearDpi).await?;
        Ok(parse_density(&output))
    }

    pub async fn set_dpi(&self, dpi: u32) -> Result<(), BridgeError> {
        self.run(RearOperation::SetRearDpi { dpi }).await.map(drop)
    }

    pub async fn reset_dpi(&self) -> Result<(), BridgeError> {
        self.run(RearOperation::ResetRearDpi).await.map(drop)
    }

    /// Locked rotation, or `None` when rotation is free.
    pub async fn rotation(&self) -> Result<Option<Rotation>, BridgeError> {
        let output = self
            .run_text(RearOperation::GetRotation {
                display_id: self.display_id,
            })
            .await?;
        Ok(parse_rotation(&output))
    }

    pub async fn set_rotation(&self, rotation: Rotation) -> Result<(), BridgeError> {
        self.run(RearOperation::SetRotation {
            display_id: self.display_id,
            rotation,
        })
        .await
        .map(drop)
    }

    /// Switch the display on or off.
    pub async fn toggle(&self, enabled: bool) -> Result<(), BridgeError> {
        self.run(RearOperation::ToggleDisplay {
            display_id: self.display_id,
            enabled,
        })
        .await
        .map(drop)
    }

    /// Topmost user task on the main display.
    pub async fn foreground_app(&self) -> Result<Option<TaskRef>, BridgeError> {
        let output = self.run_text(RearOperation::ForegroundApp).await?;
        Ok(parse_task_ref(&output)?)
    }

    /// Topmost task on this display.
    pub async fn occupant(&self) -> Result<Option<TaskRef>, BridgeError> {
        let output = self
            .run_text(RearOperation::ForegroundOnDisplay {
                display_id: self.display_id,
            })
            .await?;
        Ok(parse_task_ref(&output)?)
    }

    /// Id of the first task owned by `package`.
    pub async fn task_id_of(&self, package: &str) -> Result<Option<i32>, BridgeError> {
        let output = self
            .run_text(RearOperation::TaskIdByPackage {
                package: package.to_string(),
            })
            .await?;
        Ok(parse_task_id(&output)?)
    }

    /// Whether `task_id` currently lives on this display.
    pub async fn hosts_task(&self, task_id: i32) -> Result<bool, BridgeError> {
        let output = self
            .run_text(RearOperation::TaskOnDisplay {
                task_id,
                display_id: self.display_id,
            })
            .await?;
        Ok(parse_flag(&output)?)
    }

    pub async fn collapse_status_bar(&self) -> Result<(), BridgeError> {
        self.run(RearOperation::CollapseStatusBar).await.map(drop)
    }

    pub async fn status_bar_to_main(&self) -> Result<(), BridgeError> {
        self.run(RearOperation::StatusBarToMain).await.map(drop)
    }

    /// Move the main display's foreground app onto this display.
    ///
    /// Refuses with `DisplayOccupied` while another user app is on top
    /// here. Returns `None` when the main display has nothing to move.
    pub async fn switch_foreground(&self) -> Result<Option<TaskRef>, BridgeError> {
        let busy = self.occupant().await?.filter(|o| !o.keeps_display_idle());
        if let Some(occupant) = busy {
            return Err(BridgeError::DisplayOccupied {
                display_id: self.display_id,
                occupant: occupant.to_string(),
            });
        }
        let Some(task) = self.foreground_app().await? else {
            info!("No foreground app to switch");
            return Ok(None);
        };

        // The vendor launcher would take the display straight back.
        self.set_sub_launcher(false).await;
        self.move_task(task.task_id).await?;
        info!(task = %task, display_id = self.display_id, "Switched foreground app");
        Ok(Some(task))
    }

    /// Send a task on this display back to the main display.
    ///
    /// Returns `None` when the target is not on this display.
    pub async fn return_task(&self, target: ReturnTarget) -> Result<Option<TaskRef>, BridgeError> {
        let occupant = self.occupant().await?;
        let task = match target {
            ReturnTarget::Current => occupant,
            ReturnTarget::Task(task_id) => Some(
                occupant
                    .filter(|o| o.task_id == task_id)
                    .unwrap_or_else(|| TaskRef::unnamed(task_id)),
            ),
            ReturnTarget::Package(package) => occupant.filter(|o| o.package == package),
        };
        let Some(task) = task else {
            return Ok(None);
        };
        if !self.hosts_task(task.task_id).await? {
            info!(task = %task, display_id = self.display_id, "Task is not on this display");
            return Ok(None);
        }

        self.run(RearOperation::MoveTask {
            task_id: task.task_id,
            display_id: MAIN_DISPLAY_ID,
        })
        .await?;
        self.set_sub_launcher(true).await;
        info!(task = %task, "Returned task to the main display");
        Ok(Some(task))
    }

    /// Move a task onto this display and light it up.
    pub async fn move_task(&self, task_id: i32) -> Result<(), BridgeError> {
        self.run(RearOperation::MoveTask {
            task_id,
            display_id: self.display_id,
        })
        .await?;
        self.run(RearOperation::LaunchWake {
            display_id: self.display_id,
        })
        .await
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use rearlink_core::OperationId;
    use rearlink_core::protocol::{ClientMessage, codes};
    use serde_json::json;

    use super::*;
    use crate::broker::mock::{ConsentPolicy, MockBroker};
    use crate::config::BridgeConfig;

    fn op(id: &str) -> OperationId {
        OperationId::new(id).unwrap()
    }

    async fn connected(broker: &MockBroker) -> PermissionBridge {
        let bridge = PermissionBridge::new(Arc::new(broker.clone()), BridgeConfig::default());
        bridge.connect().await.unwrap();
        bridge
    }

    #[tokio::test]
    async fn dpi_prefers_override() {
        let broker = MockBroker::new();
        broker.set_output(
            &op("rear-dpi-get"),
            json!("Physical density: 440\nOverride density: 320\n"),
        );
        let bridge = connected(&broker).await;
        assert_eq!(RearDisplay::new(&bridge, 1).dpi().await.unwrap(), Some(320));
    }

    #[tokio::test]
    async fn info_falls_back_to_defaults() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;
        let info = RearDisplay::new(&bridge, 1).info().await.unwrap();
        assert_eq!(info, RearDisplayInfo::default());
    }

    #[tokio::test]
    async fn rotation_reads_lock_state() {
        let broker = MockBroker::new();
        broker.set_output(&op("rotation-get"), json!("lock 2\n"));
        let bridge = connected(&broker).await;
        let rotation = RearDisplay::new(&bridge, 1).rotation().await.unwrap();
        assert_eq!(rotation, Some(Rotation::Deg180));
    }

    #[tokio::test]
    async fn set_dpi_rejects_zero_before_asking() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;
        let result = RearDisplay::new(&bridge, 1).set_dpi(0).await;
        assert!(matches!(result, Err(BridgeError::Core(_))));
        assert_eq!(broker.permission_request_count(), 0);
    }

    #[tokio::test]
    async fn move_task_wakes_display() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;
        RearDisplay::new(&bridge, 1).move_task(42).await.unwrap();

        let invoked: Vec<_> = broker
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Invoke { operation, .. } => Some(operation.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(invoked, vec!["move-task", "launch-wake"]);
    }

    #[tokio::test]
    async fn toggle_denied_surfaces_denial() {
        let broker = MockBroker::new();
        broker.set_policy(&op("toggle-display"), ConsentPolicy::Deny);
        let bridge = connected(&broker).await;
        let result = RearDisplay::new(&bridge, 1).toggle(true).await;
        assert!(matches!(result, Err(BridgeError::PermissionDenied)));
        assert_eq!(broker.invocation_count(), 0);
    }

    #[tokio::test]
    async fn execution_failure_carries_code() {
        let broker = MockBroker::new();
        broker.fail_invoke(&op("rear-dpi-reset"), codes::BAD_PAYLOAD);
        let bridge = connected(&broker).await;
        let result = RearDisplay::new(&bridge, 1).reset_dpi().await;
        assert!(matches!(
            result,
            Err(BridgeError::OperationFailed(codes::BAD_PAYLOAD))
        ));
    }

    fn invoked(broker: &MockBroker) -> Vec<(String, serde_json::Value)> {
        broker
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Invoke {
                    operation, payload, ..
                } => Some((operation.to_string(), payload)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn switch_moves_foreground_app_to_rear() {
        let broker = MockBroker::new();
        broker.set_output(&op("foreground-app"), json!("com.android.camera:1434\n"));
        let bridge = connected(&broker).await;

        let moved = RearDisplay::new(&bridge, 1)
            .switch_foreground()
            .await
            .unwrap();
        assert_eq!(moved, Some(TaskRef::new("com.android.camera", 1434)));
        assert_eq!(
            invoked(&broker),
            vec![
                ("foreground-on-display".to_string(), json!({ "display_id": 1 })),
                ("foreground-app".to_string(), json!({})),
                ("sub-launcher".to_string(), json!({ "enabled": false })),
                (
                    "move-task".to_string(),
                    json!({ "task_id": 1434, "display_id": 1 })
                ),
                ("launch-wake".to_string(), json!({ "display_id": 1 })),
            ]
        );
    }

    #[tokio::test]
    async fn switch_refuses_occupied_display() {
        let broker = MockBroker::new();
        broker.set_output(&op("foreground-on-display"), json!("com.tencent.mm:88"));
        broker.set_output(&op("foreground-app"), json!("com.android.camera:1434"));
        let bridge = connected(&broker).await;

        let result = RearDisplay::new(&bridge, 1).switch_foreground().await;
        assert!(matches!(
            result,
            Err(BridgeError::DisplayOccupied { display_id: 1, ref occupant }) if occupant == "com.tencent.mm:88"
        ));
        assert!(invoked(&broker).iter().all(|(id, _)| id != "move-task"));
    }

    #[tokio::test]
    async fn vendor_launcher_does_not_block_switch() {
        let broker = MockBroker::new();
        broker.set_output(
            &op("foreground-on-display"),
            json!("com.xiaomi.subscreencenter:5"),
        );
        broker.set_output(&op("foreground-app"), json!("com.android.camera:1434"));
        broker.set_policy(&op("sub-launcher"), ConsentPolicy::Deny);
        let bridge = connected(&broker).await;

        let moved = RearDisplay::new(&bridge, 1)
            .switch_foreground()
            .await
            .unwrap();
        assert_eq!(moved.map(|t| t.task_id), Some(1434));
    }

    #[tokio::test]
    async fn switch_without_foreground_app_moves_nothing() {
        let broker = MockBroker::new();
        let bridge = connected(&broker).await;

        let moved = RearDisplay::new(&bridge, 1)
            .switch_foreground()
            .await
            .unwrap();
        assert_eq!(moved, None);
        assert!(invoked(&broker).iter().all(|(id, _)| id != "move-task"));
    }

    #[tokio::test]
    async fn return_sends_current_task_to_main_display() {
        let broker = MockBroker::new();
        broker.set_output(&op("foreground-on-display"), json!("com.android.camera:1434"));
        broker.set_output(&op("task-on-display"), json!(true));
        let bridge = connected(&broker).await;

        let returned = RearDisplay::new(&bridge, 1)
            .return_task(ReturnTarget::Current)
            .await
            .unwrap();
        assert_eq!(returned, Some(TaskRef::new("com.android.camera", 1434)));

        let calls = invoked(&broker);
        assert!(calls.contains(&(
            "move-task".to_string(),
            json!({ "task_id": 1434, "display_id": MAIN_DISPLAY_ID })
        )));
        assert_eq!(
            calls.last(),
            Some(&("sub-launcher".to_string(), json!({ "enabled": true })))
        );
    }

    #[tokio::test]
    async fn return_skips_task_not_on_display() {
        let broker = MockBroker::new();
        broker.set_output(&op("foreground-on-display"), json!("com.android.camera:1434"));
        broker.set_output(&op("task-on-display"), json!("false"));
        let bridge = connected(&broker).await;
        let rear = RearDisplay::new(&bridge, 1);

        assert_eq!(rear.return_task(ReturnTarget::Task(77)).await.unwrap(), None);
        assert_eq!(
            rear.return_task(ReturnTarget::Package("com.tencent.mm".into()))
                .await
                .unwrap(),
            None
        );
        assert!(invoked(&broker).iter().all(|(id, _)| id != "move-task"));
    }

    #[tokio::test]
    async fn lookups_parse_broker_answers() {
        let broker = MockBroker::new();
        broker.set_output(&op("task-id-by-package"), json!(-1));
        let bridge = connected(&broker).await;
        let rear = RearDisplay::new(&bridge, 1);

        assert_eq!(rear.task_id_of("com.android.camera").await.unwrap(), None);
        assert!(!rear.hosts_task(3).await.unwrap());
        assert!(matches!(
            rear.task_id_of("not a package").await,
            Err(BridgeError::Core(_))
        ));
    }
}
