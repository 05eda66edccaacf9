//! Relay and sensor collaborator interfaces.
//!
//! The cycle node drives the screw station through named relay channels
//! and reads named sensor channels. Concrete backends (GPIO expanders,
//! PLC I/O, the simulation driver) live outside this crate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical level of a (debounced) sensor input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorLevel {
    Active,
    Inactive,
}

impl SensorLevel {
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    #[inline]
    pub const fn from_bool(active: bool) -> Self {
        if active { Self::Active } else { Self::Inactive }
    }
}

impl fmt::Display for SensorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Inactive => f.write_str("inactive"),
        }
    }
}

/// Error types for relay/sensor operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// Channel name not known to the backend.
    #[error("unknown I/O channel: {0}")]
    UnknownChannel(String),

    /// Backend failed to talk to the hardware.
    #[error("I/O communication error: {0}")]
    CommunicationError(String),
}

/// Output side: relays and solenoid valves.
///
/// Writes are fire-and-forget; `pulse` blocks for the pulse duration.
pub trait RelayInterface: Send {
    /// Switch a relay on or off.
    fn set(&mut self, name: &str, on: bool) -> Result<(), IoError>;

    /// Switch a relay on for `duration`, then off again.
    fn pulse(&mut self, name: &str, duration: Duration) -> Result<(), IoError>;
}

/// Input side: debounced sensors.
///
/// `read` returns an internally consistent snapshot, so callers poll it
/// without additional locking.
pub trait SensorInterface: Send {
    /// Current level of a sensor.
    fn read(&self, name: &str) -> Result<SensorLevel, IoError>;

    /// Block until `name` reaches `level` or `timeout` elapses.
    ///
    /// Returns `Ok(true)` if the level was reached in time.
    fn wait_for(&self, name: &str, level: SensorLevel, timeout: Duration)
    -> Result<bool, IoError>;
}
