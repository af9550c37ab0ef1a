//! Parsers for display-related command output returned by the broker.
//!
//! The broker runs platform shell tools on our behalf and hands back their
//! raw text. Everything here is tolerant: missing or unrecognised data
//! falls back to defaults rather than failing.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::operation::Rotation;

const DEVICE_INFO_MARKER: &str = "DisplayDeviceInfo";
/// How far past a `DisplayDeviceInfo` header to look for the identifying data.
const DEVICE_INFO_WINDOW: usize = 2000;
/// Block length used when the rear block is the last one in the dump.
const DEVICE_INFO_TAIL: usize = 3000;

static DENSITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"density\s+(\d+)").expect("static regex is valid"));

// Vendor builds print the insets as `Rect(l, t - r, b)`.
static CUTOUT_DASHED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DisplayCutout\{insets=Rect\((\d+),\s*(\d+)\s*-\s*(\d+),\s*(\d+)\)")
        .expect("static regex is valid")
});

static CUTOUT_STANDARD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DisplayCutout\{insets=Rect\((\d+),\s*(\d+),\s*(\d+),\s*(\d+)\)")
        .expect("static regex is valid")
});

/// Cutout insets in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Insets {
    pub const fn has_cutout(&self) -> bool {
        self.left > 0 || self.top > 0 || self.right > 0 || self.bottom > 0
    }
}

/// Geometry of the rear display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RearDisplayInfo {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub cutout: Insets,
}

impl Default for RearDisplayInfo {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 2200,
            density_dpi: 440,
            cutout: Insets::default(),
        }
    }
}

/// Extract the geometry of `display_id` from `dumpsys display` output.
pub fn parse_display_dump(dump: &str, display_id: u32) -> RearDisplayInfo {
    let mut info = RearDisplayInfo::default();

    let viewport = Regex::new(&format!(
        r"displayId={display_id}\b[^}}]*deviceWidth=(\d+),\s*deviceHeight=(\d+)"
    ))
    .ok()
    .and_then(|re| {
        let caps = re.captures(dump)?;
        Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
    });
    if let Some((width, height)) = viewport {
        info.width = width;
        info.height = height;
        debug!(width, height, "Rear viewport size");
    }

    let unique_id = Regex::new(&format!(r"displayId={display_id}\b[^}}]*uniqueId='([^']+)'"))
        .ok()
        .and_then(|re| re.captures(dump).map(|c| c[1].to_string()));

    let size_marker = viewport.map(|(w, h): (u32, u32)| format!("{w} x {h}"));
    let Some(block) = device_info_block(dump, unique_id.as_deref(), size_marker.as_deref()) else {
        debug!(display_id, "No DisplayDeviceInfo block for rear display");
        return info;
    };

    if let Some(dpi) = DENSITY_RE
        .captures(block)
        .and_then(|c| c[1].parse().ok())
    {
        info.density_dpi = dpi;
    }
    info.cutout = parse_cutout(block);
    info
}

/// Locate the `DisplayDeviceInfo` block that belongs to the rear display.
fn device_info_block<'a>(
    dump: &'a str,
    unique_id: Option<&str>,
    size_marker: Option<&str>,
) -> Option<&'a str> {
    let mut starts = dump
        .match_indices(DEVICE_INFO_MARKER)
        .map(|(idx, _)| idx)
        .peekable();

    while let Some(start) = starts.next() {
        let end = starts
            .peek()
            .copied()
            .unwrap_or_else(|| char_floor(dump, start + DEVICE_INFO_TAIL));
        let window = &dump[start..end.min(char_floor(dump, start + DEVICE_INFO_WINDOW))];
        let hit = unique_id.is_some_and(|id| window.contains(id))
            || size_marker.is_some_and(|m| window.contains(m));
        if hit {
            return Some(&dump[start..end]);
        }
    }
    None
}

fn char_floor(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn parse_cutout(block: &str) -> Insets {
    let caps = CUTOUT_DASHED_RE
        .captures(block)
        .or_else(|| CUTOUT_STANDARD_RE.captures(block));
    let Some(caps) = caps else {
        return Insets::default();
    };
    let n = |i: usize| caps[i].parse().unwrap_or(0);
    Insets {
        left: n(1),
        top: n(2),
        right: n(3),
        bottom: n(4),
    }
}

/// Parse `wm density` output. An override density wins over the physical one.
pub fn parse_density(output: &str) -> Option<u32> {
    let mut physical = None;
    for line in output.lines() {
        let Some((label, value)) = line.split_once("density:") else {
            continue;
        };
        let Ok(dpi) = value.trim().parse::<u32>() else {
            continue;
        };
        if label.contains("Override") {
            return Some(dpi);
        }
        physical.get_or_insert(dpi);
    }
    physical
}

/// Parse `wm user-rotation` output: `lock N` or `free`.
pub fn parse_rotation(output: &str) -> Option<Rotation> {
    let mut parts = output.lines().next()?.split_whitespace();
    match (parts.next()?, parts.next()) {
        ("lock", Some(n)) => n.parse::<u8>().ok().and_then(|n| Rotation::try_from(n).ok()),
        _ => None,
    }
}
