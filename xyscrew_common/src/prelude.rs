//! Prelude module for common re-exports.
//!
//! ```rust
//! use xyscrew_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Timing ─────────────────────────────────────────────────────────
pub use crate::time::{Clock, MonotonicClock, SharedClock, SimClock};
pub use crate::wait::{Deadline, WaitOutcome, wait_until};

// ─── Safety ─────────────────────────────────────────────────────────
pub use crate::safety::{EstopCause, EstopLatch, SafetyState};

// ─── I/O ────────────────────────────────────────────────────────────
pub use crate::io::{IoError, RelayInterface, SensorInterface, SensorLevel};

// ─── Protocol ───────────────────────────────────────────────────────
pub use crate::protocol::{ErrorCode, Response, ResponseError};
