//! # xyscrew Cycle Library
//!
//! Screw-driving cycle controller for the two-axis table.
//!
//! - [`program`] - device programs (free and work steps)
//! - [`config`] - watchdogs, pulse lengths, I/O names, device list
//! - [`state`] - cycle states, events, transition table, status
//! - [`link`] - [`MotionLink`](link::MotionLink) to the motion node
//! - [`actuator`] - feeder, cylinder and screwdriver sequences
//! - [`machine`] - [`CycleStateMachine`](machine::CycleStateMachine)
//! - [`drivers`] - relay/sensor backends (simulation)
//! - [`watch`] - E-STOP input watcher thread

pub mod actuator;
pub mod config;
pub mod drivers;
pub mod error;
pub mod link;
pub mod machine;
pub mod program;
pub mod state;
pub mod watch;

pub use crate::config::CycleConfig;
pub use crate::error::CycleError;
pub use crate::link::{LinkError, MotionLink, StreamLink};
pub use crate::machine::CycleStateMachine;
pub use crate::state::{CycleState, CycleStatus, StatusHandle};
pub use crate::watch::EstopWatcher;
