//! # xyscrew Motion Library
//!
//! Step-pulse motion engine for the two-axis screw-driving table.
//!
//! ## Layers (leaf to root)
//!
//! 1. [`pulse`] - `StepPulseGenerator`: timed step trains for one axis
//! 2. [`axis`] / [`homing`] - `AxisController`: mm↔steps, travel limits,
//!    guarded moves, homing
//! 3. [`scheduler`] - `DualAxisScheduler`: time-interleaved X/Y moves
//! 4. [`protocol`] - line grammar, exhaustive dispatcher, responses
//!
//! [`engine::MotionEngine`] is the owned context object tying the layers
//! together. [`server`] runs it on a dedicated thread and hands out
//! serialized clients; [`transport`] frames lines from stdin or a serial
//! port onto a client.

pub mod axis;
pub mod config;
pub mod drivers;
pub mod engine;
pub mod homing;
pub mod pins;
pub mod protocol;
pub mod pulse;
pub mod rt;
pub mod scheduler;
pub mod server;
pub mod transport;

pub use crate::engine::MotionEngine;
pub use crate::protocol::{Reply, handle_line};
pub use crate::server::{MotionClient, MotionServer};
