//! Cycle node configuration.
//!
//! # TOML Example
//!
//! ```toml
//! park_on_complete = true
//!
//! [shared]
//! service_name = "xyscrew-cycle"
//!
//! [timeouts]
//! cylinder_down_s = 3.0
//! cylinder_up_s = 5.0
//! torque_s = 2.0
//! screw_feed_s = 1.0
//! screw_feed_attempts = 3
//! poll_ms = 10
//!
//! [pulses]
//! feeder_ms = 150
//! free_run_ms = 300
//!
//! [io]
//! feeder_relay = "feeder"
//! estop_sensor = "estop"
//!
//! [[devices]]
//! key = "pcb-a"
//! name = "Controller board rev A"
//!
//! [[devices.steps]]
//! x = 20.0
//! y = 30.0
//! kind = "work"
//! feed = 6000.0
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use xyscrew_common::config::{ConfigError, SharedConfig, require_positive, secs};

use crate::program::DeviceProgram;

fn default_shared() -> SharedConfig {
    SharedConfig {
        log_level: Default::default(),
        service_name: "xyscrew-cycle".to_string(),
    }
}

fn default_true() -> bool {
    true
}

/// Complete cycle node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Issue `ZERO` after the last step of a program.
    #[serde(default = "default_true")]
    pub park_on_complete: bool,
    #[serde(default = "default_shared")]
    pub shared: SharedConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub pulses: PulseConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub devices: Vec<DeviceProgram>,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            park_on_complete: true,
            shared: default_shared(),
            timeouts: TimeoutConfig::default(),
            pulses: PulseConfig::default(),
            io: IoConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl CycleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let t = &self.timeouts;
        require_positive("timeouts.cylinder_down_s", t.cylinder_down_s)?;
        require_positive("timeouts.cylinder_up_s", t.cylinder_up_s)?;
        require_positive("timeouts.torque_s", t.torque_s)?;
        require_positive("timeouts.screw_feed_s", t.screw_feed_s)?;
        if t.screw_feed_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts.screw_feed_attempts must be at least 1".to_string(),
            ));
        }
        if t.poll_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts.poll_ms must be at least 1".to_string(),
            ));
        }

        for (i, device) in self.devices.iter().enumerate() {
            device.validate()?;
            if self.devices[..i].iter().any(|d| d.key == device.key) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device key '{}'",
                    device.key
                )));
            }
        }
        Ok(())
    }

    pub fn device(&self, key: &str) -> Option<&DeviceProgram> {
        self.devices.iter().find(|d| d.key == key)
    }
}

// ─── Watchdogs ──────────────────────────────────────────────────────

/// Actuator watchdogs, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub cylinder_down_s: f64,
    pub cylinder_up_s: f64,
    pub torque_s: f64,
    /// Wait for the presence sensor after each feeder pulse.
    pub screw_feed_s: f64,
    pub screw_feed_attempts: u32,
    /// Sensor poll period of every bounded wait.
    pub poll_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            cylinder_down_s: 3.0,
            cylinder_up_s: 5.0,
            torque_s: 2.0,
            screw_feed_s: 1.0,
            screw_feed_attempts: 3,
            poll_ms: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn cylinder_down(&self) -> Duration {
        secs(self.cylinder_down_s)
    }

    pub fn cylinder_up(&self) -> Duration {
        secs(self.cylinder_up_s)
    }

    pub fn torque(&self) -> Duration {
        secs(self.torque_s)
    }

    pub fn screw_feed(&self) -> Duration {
        secs(self.screw_feed_s)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

/// Relay pulse lengths, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub feeder_ms: u64,
    pub free_run_ms: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            feeder_ms: 150,
            free_run_ms: 300,
        }
    }
}

impl PulseConfig {
    pub fn feeder(&self) -> Duration {
        Duration::from_millis(self.feeder_ms)
    }

    pub fn free_run(&self) -> Duration {
        Duration::from_millis(self.free_run_ms)
    }
}

// ─── I/O channel names ──────────────────────────────────────────────

/// Relay and sensor channel names of the screw station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub feeder_relay: String,
    pub cylinder_relay: String,
    pub torque_mode_relay: String,
    pub free_run_relay: String,
    pub screw_present_sensor: String,
    pub cylinder_down_sensor: String,
    pub cylinder_up_sensor: String,
    pub torque_reached_sensor: String,
    pub estop_sensor: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            feeder_relay: "feeder".to_string(),
            cylinder_relay: "cylinder".to_string(),
            torque_mode_relay: "torque_mode".to_string(),
            free_run_relay: "free_run".to_string(),
            screw_present_sensor: "screw_present".to_string(),
            cylinder_down_sensor: "cylinder_down".to_string(),
            cylinder_up_sensor: "cylinder_up".to_string(),
            torque_reached_sensor: "torque_reached".to_string(),
            estop_sensor: "estop".to_string(),
        }
    }
}
