//! Broker session state.
//!
//! A session is the live channel between this client and the broker. It
//! owns the link, the client token, and the grants issued during the
//! current Connected period (its *epoch*).

mod state;
mod types;

pub use state::SessionState;
pub use types::{ClientToken, Session, SessionInfo};
