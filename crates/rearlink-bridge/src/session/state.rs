//! Session state machine.

use std::fmt;

use serde::Serialize;

/// Connection state of a broker session.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnected   (broker death, disconnect)
///                     \-> Disconnected      \-> Dead -> Disconnected   (failure during use)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The link failed during use. Must be disconnected before reconnecting.
    Dead,
}

impl SessionState {
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Disconnected | Self::Dead)
                | (Self::Dead, Self::Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}
