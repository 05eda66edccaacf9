//! Device screw programs.
//!
//! A device program is an ordered list of table positions. `free` steps
//! only move the table; `work` steps move and then drive one screw.

use serde::{Deserialize, Serialize};
use xyscrew_common::config::{ConfigError, require_positive};

/// What happens at a program step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Guarded move only.
    Free,
    /// Guarded move followed by the screw sub-cycle.
    Work,
}

/// One position of a device program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgramStep {
    pub x: f64,
    pub y: f64,
    pub kind: StepKind,
    /// Feed in mm/min; the motion node default when omitted.
    #[serde(default)]
    pub feed: Option<f64>,
}

impl ProgramStep {
    #[inline]
    pub const fn is_work(&self) -> bool {
        matches!(self.kind, StepKind::Work)
    }

    /// Protocol line moving the table to this step.
    pub fn move_command(&self) -> String {
        match self.feed {
            Some(feed) => format!("G X{:.3} Y{:.3} F{:.1}", self.x, self.y, feed),
            None => format!("G X{:.3} Y{:.3}", self.x, self.y),
        }
    }
}

/// Screw program of one device type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProgram {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<ProgramStep>,
}

impl DeviceProgram {
    /// Number of holes (work steps).
    pub fn total_holes(&self) -> u32 {
        self.steps.iter().filter(|s| s.is_work()).count() as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "device key cannot be empty".to_string(),
            ));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if !(step.x.is_finite() && step.y.is_finite() && step.x >= 0.0 && step.y >= 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "device '{}' step {i}: coordinates ({}, {}) must be finite and >= 0",
                    self.key, step.x, step.y
                )));
            }
            if let Some(feed) = step.feed {
                require_positive(&format!("device '{}' step {i} feed", self.key), feed)?;
            }
        }
        Ok(())
    }
}
