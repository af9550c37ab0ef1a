//! Task lookups returned by the broker.
//!
//! Lookup operations answer with short text: `package:taskId` for a task,
//! a bare integer for a task id (`-1` when absent), and `true`/`false` for
//! membership checks. Empty output or `null` means nothing was found.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Logical id of the main (front) display.
pub const MAIN_DISPLAY_ID: u32 = 0;

/// Packages that may sit on the rear display without counting as a user app.
pub const IDLE_REAR_PACKAGES: &[&str] = &["com.xiaomi.subscreencenter"];

/// An activity task and the package it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    /// Empty when only the id is known.
    pub package: String,
    pub task_id: i32,
}

impl TaskRef {
    pub fn new(package: impl Into<String>, task_id: i32) -> Self {
        Self {
            package: package.into(),
            task_id,
        }
    }

    /// A task known only by id.
    pub const fn unnamed(task_id: i32) -> Self {
        Self {
            package: String::new(),
            task_id,
        }
    }

    /// Whether this task leaves the rear display free for a switch.
    pub fn keeps_display_idle(&self) -> bool {
        IDLE_REAR_PACKAGES
            .iter()
            .any(|idle| self.package.starts_with(idle))
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.package.is_empty() {
            write!(f, "task {}", self.task_id)
        } else {
            write!(f, "{}:{}", self.package, self.task_id)
        }
    }
}

impl FromStr for TaskRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (package, task_id) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::Protocol(format!("expected package:taskId, got {s:?}")))?;
        let task_id = task_id
            .trim()
            .parse()
            .map_err(|_| Error::Protocol(format!("bad task id in {s:?}")))?;
        if package.trim().is_empty() {
            return Err(Error::Protocol(format!("missing package in {s:?}")));
        }
        Ok(Self::new(package.trim(), task_id))
    }
}

fn is_absent(output: &str) -> bool {
    let output = output.trim();
    output.is_empty() || output == "null"
}

/// Parse a `package:taskId` answer. `None` when the broker found nothing.
pub fn parse_task_ref(output: &str) -> Result<Option<TaskRef>> {
    if is_absent(output) {
        return Ok(None);
    }
    output.parse().map(Some)
}

/// Parse a task id answer; negative ids mean no such task.
pub fn parse_task_id(output: &str) -> Result<Option<i32>> {
    if is_absent(output) {
        return Ok(None);
    }
    let id: i32 = output
        .trim()
        .parse()
        .map_err(|_| Error::Protocol(format!("expected a task id, got {output:?}")))?;
    Ok((id >= 0).then_some(id))
}

/// Parse a `true`/`false` answer.
pub fn parse_flag(output: &str) -> Result<bool> {
    match output.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" | "null" => Ok(false),
        other => Err(Error::Protocol(format!("expected true or false, got {other:?}"))),
    }
}

/// Accept only names shaped like an Android package, e.g. `com.android.camera`.
pub fn validate_package(package: &str) -> Result<()> {
    let well_formed = !package.is_empty()
        && package.len() <= 255
        && !package.starts_with('.')
        && !package.ends_with('.')
        && package
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_');
    if well_formed {
        Ok(())
    } else {
        Err(Error::InvalidOperation(format!(
            "not a package name: {package:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn task_ref_parses_package_and_id() {
        let task = parse_task_ref("com.android.camera:1434\n").unwrap().unwrap();
        assert_eq!(task, TaskRef::new("com.android.camera", 1434));
        assert_eq!(task.to_string(), "com.android.camera:1434");
    }

    #[test]
    fn empty_answers_mean_nothing_found() {
        assert_eq!(parse_task_ref("").unwrap(), None);
        assert_eq!(parse_task_ref("null\n").unwrap(), None);
        assert_eq!(parse_task_id("-1").unwrap(), None);
        assert!(!parse_flag("").unwrap());
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(matches!(parse_task_ref("camera"), Err(Error::Protocol(_))));
        assert!(matches!(parse_task_ref(":12"), Err(Error::Protocol(_))));
        assert!(matches!(parse_task_id("twelve"), Err(Error::Protocol(_))));
        assert!(matches!(parse_flag("maybe"), Err(Error::Protocol(_))));
    }

    #[test]
    fn task_id_and_flag_parse() {
        assert_eq!(parse_task_id(" 87 ").unwrap(), Some(87));
        assert!(parse_flag("true\n").unwrap());
    }

    #[test]
    fn vendor_launcher_keeps_rear_idle() {
        assert!(TaskRef::new("com.xiaomi.subscreencenter", 3).keeps_display_idle());
        assert!(!TaskRef::new("com.android.camera", 9).keeps_display_idle());
        assert_eq!(TaskRef::unnamed(9).to_string(), "task 9");
    }

    #[test]
    fn package_names_are_checked() {
        assert!(validate_package("com.android.camera").is_ok());
        for bad in ["", ".com", "com.", "com.x; reboot", "com x"] {
            assert!(validate_package(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
