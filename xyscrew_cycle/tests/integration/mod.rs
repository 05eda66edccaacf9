//! End-to-end cycle runs: cycle state machine, in-process motion node and
//! simulated station I/O on one simulated timeline.

mod common;
mod estop;
mod estop_in_motion;
mod faults;
mod happy_path;
mod pause_resume;
