//! Permission grants and outstanding consent requests.
//!
//! Grants live inside the session and die with it. Consent requests that
//! are still waiting on the user are tracked separately so they can be
//! cancelled when the caller gives up or the session ends.

mod grant;
mod pending;

pub use grant::{GrantTable, PermissionGrant};
pub use pending::{PendingConsent, PendingGuard, PendingManager};
