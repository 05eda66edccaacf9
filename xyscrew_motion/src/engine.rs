//! Motion engine context.
//!
//! [`MotionEngine`] owns both axis controllers, the pulse generator, the
//! feed presets and the stored work position. It is the single mutable
//! context behind the protocol dispatcher and is only ever touched from the
//! motion thread.
//!
//! The E-STOP latch is shared with other threads. A latch asserted outside
//! the engine stops pulse trains immediately (the generator polls it); the
//! remaining effects (drivers off, homing invalidated) are applied by
//! [`MotionEngine::sync_safety`] before the next command is dispatched.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};
use xyscrew_common::protocol::ErrorCode;
use xyscrew_common::safety::{EstopCause, EstopLatch, SafetyState};
use xyscrew_common::time::SharedClock;

use crate::axis::{AxisController, AxisError, AxisId, AxisState, MoveOutcome};
use crate::config::{MotionConfig, WorkConfig};
use crate::homing::HomingParams;
use crate::pins::{EndstopState, StepperPins};
use crate::pulse::{PulseTiming, StepPulseGenerator};
use crate::scheduler::{DualAxisScheduler, DualOutcome};

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MotionError {
    #[error(transparent)]
    Axis(#[from] AxisError),

    #[error("emergency stop active")]
    Estop,

    #[error("axis {0} is not homed")]
    NotHomed(AxisId),

    #[error("homing failed (X: {x_failed}, Y: {y_failed})")]
    HomeFailed { x_failed: bool, y_failed: bool },

    #[error("no work position stored")]
    NoWorkPosition,
}

impl MotionError {
    /// Protocol error code reported for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Axis(AxisError::InvalidFeed { .. }) => ErrorCode::BadArgs,
            Self::Axis(AxisError::HomeNotFound { axis: AxisId::X, .. }) => ErrorCode::HomeXNotFound,
            Self::Axis(AxisError::HomeNotFound { axis: AxisId::Y, .. }) => ErrorCode::HomeYNotFound,
            Self::Axis(AxisError::Estop(_)) | Self::Estop => ErrorCode::Estop,
            Self::Axis(AxisError::InvalidParameter { .. }) => ErrorCode::BadSet,
            Self::NotHomed(_) => ErrorCode::NotHomed,
            Self::HomeFailed {
                x_failed: true,
                y_failed: true,
            } => ErrorCode::HomeNotFound,
            Self::HomeFailed { x_failed: true, .. } => ErrorCode::HomeXNotFound,
            Self::HomeFailed { .. } => ErrorCode::HomeYNotFound,
            Self::NoWorkPosition => ErrorCode::BadArgs,
        }
    }
}

// ─── Value types ────────────────────────────────────────────────────

/// Which axes a home request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeTarget {
    All,
    Axis(AxisId),
}

/// Named feed presets (mm/min).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPreset {
    Default,
    Max,
    Jog,
}

/// Stored work position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkPosition {
    pub x_mm: f64,
    pub y_mm: f64,
    pub feed_mm_min: Option<f64>,
}

impl From<&WorkConfig> for WorkPosition {
    fn from(config: &WorkConfig) -> Self {
        Self {
            x_mm: config.x_mm,
            y_mm: config.y_mm,
            feed_mm_min: config.feed_mm_min,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FeedLimits {
    default_mm_min: f64,
    max_mm_min: f64,
    jog_mm_min: f64,
}

/// Status snapshot rendered as the `M114` line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionStatus {
    pub x: AxisState,
    pub y: AxisState,
    pub drivers_enabled: bool,
    pub safety: SafetyState,
}

impl fmt::Display for MotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} HX:{} HY:{} EN:{} ESTOP:{}",
            self.x.position_mm,
            self.y.position_mm,
            u8::from(self.x.homed),
            u8::from(self.y.homed),
            u8::from(self.drivers_enabled),
            u8::from(self.safety.estop_active)
        )
    }
}

/// Format an endstop snapshot as the `M119` line.
pub fn format_endstops(state: EndstopState) -> String {
    let level = |flag| {
        if state.contains(flag) {
            "TRIGGERED"
        } else {
            "open"
        }
    };
    format!(
        "X_MIN:{} Y_MIN:{}",
        level(EndstopState::X_MIN),
        level(EndstopState::Y_MIN)
    )
}

// ─── Engine ─────────────────────────────────────────────────────────

pub struct MotionEngine {
    x: AxisController,
    y: AxisController,
    generator: StepPulseGenerator,
    feeds: FeedLimits,
    work: Option<WorkPosition>,
    /// Whether the latch's effects have been applied to the axes.
    estop_applied: bool,
}

impl MotionEngine {
    pub fn new(
        config: &MotionConfig,
        x_pins: Box<dyn StepperPins>,
        y_pins: Box<dyn StepperPins>,
        clock: SharedClock,
        estop: EstopLatch,
    ) -> Self {
        let homing = HomingParams::from(&config.homing);
        let mut x = AxisController::new(AxisId::X, &config.axes.x, homing, x_pins);
        let mut y = AxisController::new(AxisId::Y, &config.axes.y, homing, y_pins);
        x.set_enabled(false);
        y.set_enabled(false);

        Self {
            x,
            y,
            generator: StepPulseGenerator::new(
                PulseTiming::from_config(&config.pulse),
                clock,
                estop,
            ),
            feeds: FeedLimits {
                default_mm_min: config.feed.default_mm_min,
                max_mm_min: config.feed.max_mm_min,
                jog_mm_min: config.feed.jog_mm_min,
            },
            work: config.work.as_ref().map(WorkPosition::from),
            estop_applied: false,
        }
    }

    pub fn axis(&self, id: AxisId) -> &AxisController {
        match id {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
        }
    }

    pub fn axis_mut(&mut self, id: AxisId) -> &mut AxisController {
        match id {
            AxisId::X => &mut self.x,
            AxisId::Y => &mut self.y,
        }
    }

    #[inline]
    pub fn estop(&self) -> &EstopLatch {
        self.generator.estop()
    }

    #[inline]
    pub fn is_estopped(&self) -> bool {
        self.generator.estop().is_active()
    }

    pub fn drivers_enabled(&self) -> bool {
        self.x.is_enabled() && self.y.is_enabled()
    }

    pub fn status(&self) -> MotionStatus {
        MotionStatus {
            x: *self.x.state(),
            y: *self.y.state(),
            drivers_enabled: self.drivers_enabled(),
            safety: self.generator.estop().snapshot(),
        }
    }

    pub fn endstops(&self) -> EndstopState {
        let mut state = EndstopState::empty();
        state.set(EndstopState::X_MIN, self.x.endstop_triggered());
        state.set(EndstopState::Y_MIN, self.y.endstop_triggered());
        state
    }

    pub fn work_position(&self) -> Option<WorkPosition> {
        self.work
    }

    // ─── Safety ─────────────────────────────────────────────────────

    /// Apply the effects of a latch asserted since the last command.
    pub fn sync_safety(&mut self) {
        let active = self.is_estopped();
        if active && !self.estop_applied {
            self.x.set_enabled(false);
            self.y.set_enabled(false);
            warn!("E-STOP applied: drivers disabled, homing invalidated");
        }
        self.estop_applied = active;
    }

    pub fn emergency_stop(&mut self, cause: EstopCause) {
        self.generator.estop().trigger(cause);
        self.sync_safety();
    }

    /// Release the latch and re-enable the drivers. Homing stays invalid.
    pub fn clear_estop(&mut self) {
        self.generator.estop().clear();
        self.estop_applied = false;
        self.set_drivers(true);
    }

    /// `M17` / `M18`. Disabling invalidates homing.
    pub fn set_drivers(&mut self, enabled: bool) {
        self.x.set_enabled(enabled);
        self.y.set_enabled(enabled);
        info!("Drivers {}", if enabled { "enabled" } else { "disabled" });
    }

    fn ensure_running(&mut self) -> Result<(), MotionError> {
        self.sync_safety();
        if self.is_estopped() {
            Err(MotionError::Estop)
        } else {
            Ok(())
        }
    }

    // ─── Feeds ──────────────────────────────────────────────────────

    pub fn preset_mm_min(&self, preset: FeedPreset) -> f64 {
        match preset {
            FeedPreset::Default => self.feeds.default_mm_min,
            FeedPreset::Max => self.feeds.max_mm_min,
            FeedPreset::Jog => self.feeds.jog_mm_min,
        }
    }

    /// Resolve a requested feed (mm/min) to mm/s.
    ///
    /// Non-positive feeds are rejected; feeds above the maximum are
    /// clamped.
    pub fn resolve_feed(
        &self,
        axis: AxisId,
        requested_mm_min: Option<f64>,
        preset: FeedPreset,
    ) -> Result<f64, MotionError> {
        let feed = requested_mm_min.unwrap_or_else(|| self.preset_mm_min(preset));
        if !(feed.is_finite() && feed > 0.0) {
            return Err(AxisError::InvalidFeed { axis, feed }.into());
        }
        if feed > self.feeds.max_mm_min {
            warn!(
                "Feed {:.1} mm/min clamped to {:.1} mm/min",
                feed, self.feeds.max_mm_min
            );
        }
        Ok(feed.min(self.feeds.max_mm_min) / 60.0)
    }

    // ─── Motion ─────────────────────────────────────────────────────

    /// Coordinated absolute move. `None` keeps that axis where it is.
    ///
    /// Every axis given a target must be homed.
    pub fn move_xy(
        &mut self,
        target_x: Option<f64>,
        target_y: Option<f64>,
        feed_mm_min: Option<f64>,
        preset: FeedPreset,
        guarded: bool,
    ) -> Result<DualOutcome, MotionError> {
        self.ensure_running()?;
        let feed_mm_s = self.resolve_feed(AxisId::X, feed_mm_min, preset)?;
        for (id, target) in [(AxisId::X, target_x), (AxisId::Y, target_y)] {
            if target.is_some() && !self.axis(id).is_homed() {
                return Err(MotionError::NotHomed(id));
            }
        }
        let tx = target_x.unwrap_or_else(|| self.x.position_mm());
        let ty = target_y.unwrap_or_else(|| self.y.position_mm());
        let outcome = DualAxisScheduler::new(&self.generator).move_to(
            &mut self.x,
            &mut self.y,
            tx,
            ty,
            feed_mm_s,
            guarded,
        );
        self.finish(outcome)
    }

    /// Relative single-axis move.
    pub fn jog(
        &mut self,
        axis: AxisId,
        delta_mm: f64,
        feed_mm_min: Option<f64>,
        preset: FeedPreset,
        guarded: bool,
    ) -> Result<MoveOutcome, MotionError> {
        self.ensure_running()?;
        let feed_mm_s = self.resolve_feed(axis, feed_mm_min, preset)?;
        if !self.axis(axis).is_homed() {
            return Err(MotionError::NotHomed(axis));
        }
        let generator = self.generator.clone();
        let outcome = self.axis_mut(axis).jog(&generator, delta_mm, feed_mm_s, guarded);
        self.finish(outcome)
    }

    /// Home one or both axes.
    ///
    /// Homing both attempts each axis even if the first fails, so the
    /// error can name every axis that did not find its switch.
    pub fn home(&mut self, target: HomeTarget) -> Result<(), MotionError> {
        self.ensure_running()?;
        let axes: &[AxisId] = match target {
            HomeTarget::All => &AxisId::ALL,
            HomeTarget::Axis(AxisId::X) => &[AxisId::X],
            HomeTarget::Axis(AxisId::Y) => &[AxisId::Y],
        };

        let mut failed = [false; 2];
        for &id in axes {
            let generator = self.generator.clone();
            match self.axis_mut(id).home(&generator) {
                Ok(()) => {}
                Err(AxisError::Estop(_)) => {
                    self.sync_safety();
                    return Err(MotionError::Estop);
                }
                Err(err) => {
                    warn!("{err}");
                    failed[id.index()] = true;
                }
            }
        }

        match (target, failed) {
            (_, [false, false]) => Ok(()),
            (HomeTarget::Axis(id), _) => Err(MotionError::HomeFailed {
                x_failed: id == AxisId::X,
                y_failed: id == AxisId::Y,
            }),
            (HomeTarget::All, [x_failed, y_failed]) => {
                Err(MotionError::HomeFailed { x_failed, y_failed })
            }
        }
    }

    fn finish<T>(&mut self, outcome: Result<T, AxisError>) -> Result<T, MotionError> {
        match outcome {
            Ok(value) => Ok(value),
            Err(AxisError::Estop(_)) => {
                self.sync_safety();
                Err(MotionError::Estop)
            }
            Err(err) => Err(err.into()),
        }
    }

    // ─── Work position ──────────────────────────────────────────────

    pub fn set_work(&mut self, x_mm: f64, y_mm: f64, feed_mm_min: Option<f64>) -> Result<(), MotionError> {
        for (id, value) in [(AxisId::X, x_mm), (AxisId::Y, y_mm)] {
            let limit = self.axis(id).state().limit_max_mm;
            if !(value.is_finite() && (0.0..=limit).contains(&value)) {
                return Err(AxisError::InvalidParameter {
                    axis: id,
                    name: "work position",
                    value,
                }
                .into());
            }
        }
        if let Some(feed) = feed_mm_min
            && !(feed.is_finite() && feed > 0.0)
        {
            return Err(AxisError::InvalidParameter {
                axis: AxisId::X,
                name: "work feed",
                value: feed,
            }
            .into());
        }
        self.work = Some(WorkPosition {
            x_mm,
            y_mm,
            feed_mm_min,
        });
        info!("Work position set to ({:.3}, {:.3})", x_mm, y_mm);
        Ok(())
    }

    /// Guarded move to the stored work position.
    ///
    /// `feed_mm_min` overrides the stored feed for this move only.
    pub fn move_to_work(&mut self, feed_mm_min: Option<f64>) -> Result<DualOutcome, MotionError> {
        let work = self.work.ok_or(MotionError::NoWorkPosition)?;
        self.move_xy(
            Some(work.x_mm),
            Some(work.y_mm),
            feed_mm_min.or(work.feed_mm_min),
            FeedPreset::Default,
            true,
        )
    }
}

impl fmt::Debug for MotionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionEngine")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("work", &self.work)
            .field("estop_applied", &self.estop_applied)
            .finish()
    }
}
