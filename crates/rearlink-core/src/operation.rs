//! Operation identifiers, requests, and the rear-display catalog.
//!
//! A grant is keyed by [`OperationId`]; an [`OperationRequest`] pairs an id
//! with an opaque JSON payload. [`RearOperation`] is the typed catalog of the
//! capabilities this project drives through the broker.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::task::validate_package;

/// Identifier of a restricted operation class, e.g. `toggle-display`.
///
/// Lowercase ASCII letters, digits and single dashes; at most 64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    pub const MAX_LEN: usize = 64;

    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return Err(Error::InvalidOperation(format!(
                "operation id must be 1..={} bytes: {id:?}",
                Self::MAX_LEN
            )));
        }
        let valid_chars = id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid_chars || id.starts_with('-') || id.ends_with('-') || id.contains("--") {
            return Err(Error::InvalidOperation(format!(
                "operation id must be kebab-case: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperationId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for OperationId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single invocation of a restricted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(rename = "op")]
    pub operation: OperationId,
    #[serde(default)]
    pub payload: Value,
}

impl OperationRequest {
    pub const fn new(operation: OperationId, payload: Value) -> Self {
        Self { operation, payload }
    }

    /// Request with an empty object payload.
    pub fn bare(operation: OperationId) -> Self {
        Self::new(operation, json!({}))
    }
}

/// Display rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

impl TryFrom<u8> for Rotation {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Deg0),
            1 => Ok(Self::Deg90),
            2 => Ok(Self::Deg180),
            3 => Ok(Self::Deg270),
            other => Err(Error::InvalidOperation(format!(
                "rotation must be 0..=3, got {other}"
            ))),
        }
    }
}

impl From<Rotation> for u8 {
    fn from(r: Rotation) -> Self {
        match r {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }
}

/// Typed catalog of rear-display operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RearOperation {
    /// Switch a display on or off.
    ToggleDisplay { display_id: u32, enabled: bool },
    /// Move an activity task to another display.
    MoveTask { task_id: i32, display_id: u32 },
    /// Launch the wake activity on a display to light it up.
    LaunchWake { display_id: u32 },
    /// Enable or force-stop the vendor sub-screen launcher.
    SubLauncher { enabled: bool },
    GetRearDpi,
    SetRearDpi { dpi: u32 },
    ResetRearDpi,
    GetRotation { display_id: u32 },
    SetRotation { display_id: u32, rotation: Rotation },
    RearScreenshot,
    /// Raw `dumpsys display` output.
    DisplayDump,
    /// Topmost user task on the main display, as `package:taskId`.
    ForegroundApp,
    /// First task id belonging to a package.
    TaskIdByPackage { package: String },
    /// Topmost task on a display, as `package:taskId`.
    ForegroundOnDisplay { display_id: u32 },
    /// Whether a task currently lives on a display.
    TaskOnDisplay { task_id: i32, display_id: u32 },
    CollapseStatusBar,
    /// Pin the status bar back to the main display.
    StatusBarToMain,
}

impl RearOperation {
    /// Wire identifier of this operation.
    pub const fn id_str(&self) -> &'static str {
        match self {
            Self::ToggleDisplay { .. } => "toggle-display",
            Self::MoveTask { .. } => "move-task",
            Self::LaunchWake { .. } => "launch-wake",
            Self::SubLauncher { .. } => "sub-launcher",
            Self::GetRearDpi => "rear-dpi-get",
            Self::SetRearDpi { .. } => "rear-dpi-set",
            Self::ResetRearDpi => "rear-dpi-reset",
            Self::GetRotation { .. } => "rotation-get",
            Self::SetRotation { .. } => "rotation-set",
            Self::RearScreenshot => "rear-screenshot",
            Self::DisplayDump => "display-dump",
            Self::ForegroundApp => "foreground-app",
            Self::TaskIdByPackage { .. } => "task-id-by-package",
            Self::ForegroundOnDisplay { .. } => "foreground-on-display",
            Self::TaskOnDisplay { .. } => "task-on-display",
            Self::CollapseStatusBar => "status-bar-collapse",
            Self::StatusBarToMain => "status-bar-to-main",
        }
    }

    pub fn id(&self) -> OperationId {
        // Catalog ids are static kebab-case literals.
        OperationId(self.id_str().to_string())
    }

    /// Build the wire request, validating arguments first.
    pub fn to_request(&self) -> Result<OperationRequest> {
        let payload = match *self {
            Self::MoveTask { task_id, .. } | Self::TaskOnDisplay { task_id, .. } if task_id < 0 => {
                return Err(Error::InvalidOperation(format!(
                    "task id must be non-negative, got {task_id}"
                )));
            }
            Self::ToggleDisplay {
                display_id,
                enabled,
            } => json!({ "display_id": display_id, "enabled": enabled }),
            Self::MoveTask {
                task_id,
                display_id,
            }
            | Self::TaskOnDisplay {
                task_id,
                display_id,
            } => json!({ "task_id": task_id, "display_id": display_id }),
            Self::LaunchWake { display_id }
            | Self::GetRotation { display_id }
            | Self::ForegroundOnDisplay { display_id } => {
                json!({ "display_id": display_id })
            }
            Self::TaskIdByPackage { ref package } => {
                validate_package(package)?;
                json!({ "package": package })
            }
            Self::SubLauncher { enabled } => json!({ "enabled": enabled }),
            Self::SetRearDpi { dpi } => {
                if dpi == 0 {
                    return Err(Error::InvalidOperation("dpi must be positive".into()));
                }
                json!({ "dpi": dpi })
            }
            Self::SetRotation {
                display_id,
                rotation,
            } => json!({ "display_id": display_id, "rotation": rotation }),
            Self::GetRearDpi
            | Self::ResetRearDpi
            | Self::RearScreenshot
            | Self::DisplayDump
            | Self::ForegroundApp
            | Self::CollapseStatusBar
            | Self::StatusBarToMain => json!({}),
        };
        Ok(OperationRequest::new(self.id(), payload))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn operation_id_accepts_kebab_case() {
        assert_eq!(
            OperationId::new("toggle-display").unwrap().as_str(),
            "toggle-display"
        );
        assert!(OperationId::new("rear-dpi-2").is_ok());
    }

    #[test]
    fn operation_id_rejects_malformed() {
        for bad in ["", "Toggle", "a b", "-x", "x-", "a--b", "x_y"] {
            assert!(OperationId::new(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(OperationId::new("a".repeat(OperationId::MAX_LEN + 1)).is_err());
    }

    #[test]
    fn request_serializes_with_op_key() {
        let req = OperationRequest::bare(OperationId::new("toggle-display").unwrap());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, json!({ "op": "toggle-display", "payload": {} }));
    }

    #[test]
    fn catalog_ids_are_valid() {
        let ops = [
            RearOperation::ToggleDisplay {
                display_id: 1,
                enabled: true,
            },
            RearOperation::MoveTask {
                task_id: 7,
                display_id: 1,
            },
            RearOperation::LaunchWake { display_id: 1 },
            RearOperation::SubLauncher { enabled: false },
            RearOperation::GetRearDpi,
            RearOperation::SetRearDpi { dpi: 300 },
            RearOperation::ResetRearDpi,
            RearOperation::GetRotation { display_id: 1 },
            RearOperation::SetRotation {
                display_id: 1,
                rotation: Rotation::Deg90,
            },
            RearOperation::RearScreenshot,
            RearOperation::DisplayDump,
            RearOperation::ForegroundApp,
            RearOperation::TaskIdByPackage {
                package: "com.android.camera".into(),
            },
            RearOperation::ForegroundOnDisplay { display_id: 1 },
            RearOperation::TaskOnDisplay {
                task_id: 7,
                display_id: 1,
            },
            RearOperation::CollapseStatusBar,
            RearOperation::StatusBarToMain,
        ];
        for op in ops {
            assert!(OperationId::new(op.id_str()).is_ok(), "{}", op.id_str());
            assert!(op.to_request().is_ok());
        }
    }

    #[test]
    fn set_rotation_payload_uses_quarter_turns() {
        let req = RearOperation::SetRotation {
            display_id: 1,
            rotation: Rotation::Deg270,
        }
        .to_request()
        .unwrap();
        assert_eq!(req.payload, json!({ "display_id": 1, "rotation": 3 }));
    }

    #[test]
    fn invalid_arguments_rejected_before_sending() {
        assert!(RearOperation::SetRearDpi { dpi: 0 }.to_request().is_err());
        assert!(
            RearOperation::MoveTask {
                task_id: -1,
                display_id: 1
            }
            .to_request()
            .is_err()
        );
        assert!(
            RearOperation::TaskOnDisplay {
                task_id: -3,
                display_id: 1
            }
            .to_request()
            .is_err()
        );
        assert!(
            RearOperation::TaskIdByPackage {
                package: "com.x && reboot".into()
            }
            .to_request()
            .is_err()
        );
        assert!(Rotation::try_from(4).is_err());
        assert!(serde_json::from_value::<Rotation>(json!(9)).is_err());
    }

    #[test]
    fn lookup_payloads_name_their_targets() {
        let by_package = RearOperation::TaskIdByPackage {
            package: "com.android.camera".into(),
        }
        .to_request()
        .unwrap();
        assert_eq!(by_package.operation.as_str(), "task-id-by-package");
        assert_eq!(by_package.payload, json!({ "package": "com.android.camera" }));

        let on_display = RearOperation::TaskOnDisplay {
            task_id: 1471,
            display_id: 1,
        }
        .to_request()
        .unwrap();
        assert_eq!(on_display.payload, json!({ "task_id": 1471, "display_id": 1 }));
    }
}
