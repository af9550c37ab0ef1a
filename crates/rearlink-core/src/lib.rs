//! `rearlink` Core Library
//!
//! Shared functionality for `rearlink` components:
//! - NDJSON wire protocol spoken with the privilege broker
//! - Operation catalog for rear-display capabilities
//! - Parsers for broker command output (display dump, density, rotation,
//!   task lookups)
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod display;
pub mod error;
pub mod operation;
pub mod protocol;
pub mod task;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use operation::{OperationId, OperationRequest, RearOperation, Rotation};
pub use task::TaskRef;
