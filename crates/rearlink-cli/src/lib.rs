//! rearlink CLI Library
//!
//! Subcommands of the `rearlink` binary. Each one writes user-facing output
//! to the writer it is given so it can be exercised against a mock broker.

pub mod bridge_cmd;
pub mod display_cmd;
