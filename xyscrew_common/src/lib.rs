//! xyscrew Common Library
//!
//! Shared building blocks for the motion node and the cycle node of the
//! two-axis screw-driving table.
//!
//! # Module Structure
//!
//! - [`config`] - TOML configuration loading traits and types
//! - [`time`] - Clock capability (monotonic and simulated)
//! - [`wait`] - Deadline-bounded wait primitive
//! - [`safety`] - Shared emergency-stop latch
//! - [`io`] - Relay and sensor collaborator interfaces
//! - [`protocol`] - Wire-protocol response vocabulary
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use xyscrew_common::prelude::*;
//! ```

pub mod config;
pub mod io;
pub mod prelude;
pub mod protocol;
pub mod safety;
pub mod time;
pub mod wait;
