//! Motion node configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "xyscrew-motion"
//! log_level = "info"
//!
//! [pulse]
//! max_step_hz = 20000.0
//! min_pulse_us = 5
//! dir_setup_us = 5
//!
//! [feed]
//! default_mm_min = 6000.0
//! max_mm_min = 12000.0
//! jog_mm_min = 1500.0
//!
//! [homing]
//! backoff_mm = 5.0
//! fast_mm_min = 3000.0
//! slow_mm_min = 300.0
//! timeout_s = 20.0
//!
//! [axes.x]
//! steps_per_mm = 80.0
//! limit_max_mm = 165.0
//!
//! [axes.y]
//! steps_per_mm = 80.0
//! limit_max_mm = 350.0
//! direction_invert = true
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use xyscrew_common::config::{ConfigError, SharedConfig, require_positive, secs};

use crate::axis::AxisId;

fn default_shared() -> SharedConfig {
    SharedConfig {
        log_level: Default::default(),
        service_name: "xyscrew-motion".to_string(),
    }
}

/// Complete motion node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "default_shared")]
    pub shared: SharedConfig,
    #[serde(default)]
    pub pulse: PulseConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub homing: HomingConfig,
    #[serde(default)]
    pub axes: AxesConfig,
    /// Stored work position restored at startup.
    #[serde(default)]
    pub work: Option<WorkConfig>,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            shared: default_shared(),
            pulse: PulseConfig::default(),
            feed: FeedConfig::default(),
            homing: HomingConfig::default(),
            axes: AxesConfig::default(),
            work: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl MotionConfig {
    /// Semantic validation after parsing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        require_positive("pulse.max_step_hz", self.pulse.max_step_hz)?;
        if self.pulse.min_pulse_us == 0 {
            return Err(ConfigError::ValidationError(
                "pulse.min_pulse_us must be at least 1".to_string(),
            ));
        }

        require_positive("feed.default_mm_min", self.feed.default_mm_min)?;
        require_positive("feed.max_mm_min", self.feed.max_mm_min)?;
        require_positive("feed.jog_mm_min", self.feed.jog_mm_min)?;
        if self.feed.default_mm_min > self.feed.max_mm_min {
            return Err(ConfigError::ValidationError(format!(
                "feed.default_mm_min ({}) exceeds feed.max_mm_min ({})",
                self.feed.default_mm_min, self.feed.max_mm_min
            )));
        }

        require_positive("homing.backoff_mm", self.homing.backoff_mm)?;
        require_positive("homing.fast_mm_min", self.homing.fast_mm_min)?;
        require_positive("homing.slow_mm_min", self.homing.slow_mm_min)?;
        require_positive("homing.timeout_s", self.homing.timeout_s)?;

        for id in AxisId::ALL {
            let axis = self.axes.get(id);
            let prefix = format!("axes.{}", id.letter().to_ascii_lowercase());
            require_positive(&format!("{prefix}.steps_per_mm"), axis.steps_per_mm)?;
            require_positive(&format!("{prefix}.limit_max_mm"), axis.limit_max_mm)?;
            require_positive(&format!("{prefix}.mm_per_rev"), axis.mm_per_rev)?;
        }

        if let Some(work) = &self.work {
            if !(0.0..=self.axes.x.limit_max_mm).contains(&work.x_mm)
                || !(0.0..=self.axes.y.limit_max_mm).contains(&work.y_mm)
            {
                return Err(ConfigError::ValidationError(format!(
                    "work position ({}, {}) lies outside the axis limits",
                    work.x_mm, work.y_mm
                )));
            }
            if let Some(feed) = work.feed_mm_min {
                require_positive("work.feed_mm_min", feed)?;
            }
        }
        Ok(())
    }
}

// ─── Pulse timing ───────────────────────────────────────────────────

fn default_max_step_hz() -> f64 {
    20_000.0
}
fn default_min_pulse_us() -> u64 {
    5
}
fn default_dir_setup_us() -> u64 {
    5
}

/// Step pulse timing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Upper bound for any step frequency (Hz).
    #[serde(default = "default_max_step_hz")]
    pub max_step_hz: f64,
    /// Minimum STEP high/low width (µs).
    #[serde(default = "default_min_pulse_us")]
    pub min_pulse_us: u64,
    /// Settling time after a DIR change before the first STEP edge (µs).
    #[serde(default = "default_dir_setup_us")]
    pub dir_setup_us: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            max_step_hz: default_max_step_hz(),
            min_pulse_us: default_min_pulse_us(),
            dir_setup_us: default_dir_setup_us(),
        }
    }
}

// ─── Feeds ──────────────────────────────────────────────────────────

/// Feed rates in mm/min, the unit used by the protocol's `F` argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub default_mm_min: f64,
    pub max_mm_min: f64,
    pub jog_mm_min: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_mm_min: 6000.0,
            max_mm_min: 12000.0,
            jog_mm_min: 1500.0,
        }
    }
}

// ─── Homing ─────────────────────────────────────────────────────────

/// Homing sequence parameters (shared by both axes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomingConfig {
    pub backoff_mm: f64,
    pub fast_mm_min: f64,
    pub slow_mm_min: f64,
    /// Overall timeout for one axis' homing sequence.
    pub timeout_s: f64,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            backoff_mm: 5.0,
            fast_mm_min: 3000.0,
            slow_mm_min: 300.0,
            timeout_s: 20.0,
        }
    }
}

impl HomingConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_s)
    }
}

// ─── Axes ───────────────────────────────────────────────────────────

fn default_steps_per_mm() -> f64 {
    80.0
}
fn default_mm_per_rev() -> f64 {
    40.0
}

/// Per-axis mechanical parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: f64,
    /// Soft travel limit; targets are clamped to `[0, limit_max_mm]`.
    pub limit_max_mm: f64,
    #[serde(default)]
    pub direction_invert: bool,
    /// Linear travel per motor revolution, used by `SET STEPS`.
    #[serde(default = "default_mm_per_rev")]
    pub mm_per_rev: f64,
}

impl AxisConfig {
    pub fn with_limit(limit_max_mm: f64) -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            limit_max_mm,
            direction_invert: false,
            mm_per_rev: default_mm_per_rev(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxesConfig {
    pub x: AxisConfig,
    pub y: AxisConfig,
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            x: AxisConfig::with_limit(165.0),
            y: AxisConfig::with_limit(350.0),
        }
    }
}

impl AxesConfig {
    pub fn get(&self, id: AxisId) -> &AxisConfig {
        match id {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
        }
    }
}

/// Stored work position (`WORK` with no arguments).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkConfig {
    pub x_mm: f64,
    pub y_mm: f64,
    #[serde(default)]
    pub feed_mm_min: Option<f64>,
}

// ─── Simulation ─────────────────────────────────────────────────────

/// Simulated table geometry (used by the `simulation` driver).
///
/// The simulated endstop is triggered whenever the carriage sits at or
/// below 0 mm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Physical X carriage position at power-up.
    pub x_start_mm: f64,
    /// Physical Y carriage position at power-up.
    pub y_start_mm: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            x_start_mm: 20.0,
            y_start_mm: 40.0,
        }
    }
}

impl SimulationConfig {
    pub fn start_mm(&self, id: AxisId) -> f64 {
        match id {
            AxisId::X => self.x_start_mm,
            AxisId::Y => self.y_start_mm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use xyscrew_common::config::ConfigLoader;

    #[test]
    fn empty_file_yields_defaults() {
        let config = MotionConfig::from_toml("").unwrap();
        assert_eq!(config.shared.service_name, "xyscrew-motion");
        assert_eq!(config.pulse.max_step_hz, 20_000.0);
        assert_eq!(config.feed.max_mm_min, 12000.0);
        assert_eq!(config.axes.x.limit_max_mm, 165.0);
        assert_eq!(config.axes.y.limit_max_mm, 350.0);
        assert_eq!(config.homing.timeout(), Duration::from_secs(20));
        assert!(config.work.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn shipped_sample_is_valid() {
        let config = MotionConfig::from_toml(include_str!("../../config/motion.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.work.as_ref().map(|w| w.x_mm), Some(80.0));
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[axes.x]\nlimit_max_mm = 120.0\n[axes.y]\nlimit_max_mm = 300.0\n")
            .unwrap();

        let config = MotionConfig::load(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.axes.x.limit_max_mm, 120.0);
        assert_eq!(config.axes.y.limit_max_mm, 300.0);
        assert_eq!(config.axes.y.steps_per_mm, 80.0);
    }

    #[test]
    fn parse_full_document() {
        let toml = r#"
            [shared]
            service_name = "bench-motion"
            log_level = "debug"

            [pulse]
            max_step_hz = 10000.0

            [homing]
            timeout_s = 2.5

            [axes.x]
            steps_per_mm = 100.0
            limit_max_mm = 200.0

            [axes.y]
            limit_max_mm = 300.0
            direction_invert = true

            [work]
            x_mm = 50.0
            y_mm = 120.0
        "#;
        let config = MotionConfig::from_toml(toml).unwrap();
        assert_eq!(config.pulse.max_step_hz, 10000.0);
        assert_eq!(config.pulse.min_pulse_us, 5);
        assert_eq!(config.homing.timeout(), Duration::from_millis(2500));
        assert_eq!(config.axes.x.steps_per_mm, 100.0);
        assert!(config.axes.y.direction_invert);
        assert_eq!(config.axes.y.steps_per_mm, 80.0);
        assert_eq!(config.work.as_ref().map(|w| w.y_mm), Some(120.0));
        config.validate().unwrap();
    }

    #[test]
    fn axis_table_requires_limit() {
        let toml = "[axes.x]\nsteps_per_mm = 80.0\n[axes.y]\nlimit_max_mm = 1.0\n";
        assert!(matches!(
            MotionConfig::from_toml(toml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn validate_rejects_non_positive_values() {
        let mut config = MotionConfig::default();
        config.axes.y.steps_per_mm = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("axes.y.steps_per_mm")
        ));
    }

    #[test]
    fn validate_rejects_default_feed_above_max() {
        let mut config = MotionConfig::default();
        config.feed.default_mm_min = 20000.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_work_outside_limits() {
        let mut config = MotionConfig::default();
        config.work = Some(WorkConfig {
            x_mm: 500.0,
            y_mm: 10.0,
            feed_mm_min: None,
        });
        assert!(config.validate().is_err());
    }
}
