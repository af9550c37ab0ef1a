//! Failures raised while building, encoding or configuring broker traffic.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the core crate can reject before a byte reaches the broker.
#[derive(Debug, Error)]
pub enum Error {
    /// A broker line that is not a message this client understands.
    #[error("Malformed broker message: {0}")]
    Protocol(String),

    /// A settings file that cannot be read or does not fit the schema.
    #[error("Bad configuration: {0}")]
    Config(String),

    /// Operation id or arguments refused locally.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
