//! Per-axis controller.
//!
//! An [`AxisController`] owns one axis' mechanical state and step channel.
//! It converts millimetre targets into step counts, clamps them to the soft
//! travel window `[0, limit_max_mm]` and drives single-axis moves through a
//! [`StepPulseGenerator`]. Homing lives in [`crate::homing`].

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AxisConfig;
use crate::homing::{HomingFailReason, HomingParams, HomingPhase};
use crate::pins::{Direction, StepperPins};
use crate::pulse::{PulseOutcome, PulseTrain, StepChannel, StepPulseGenerator};

/// Axis identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    X,
    Y,
}

impl AxisId {
    pub const ALL: [AxisId; 2] = [AxisId::X, AxisId::Y];

    #[inline]
    pub const fn letter(&self) -> char {
        match self {
            Self::X => 'X',
            Self::Y => 'Y',
        }
    }

    #[inline]
    pub const fn index(&self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Mechanical state of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisState {
    pub position_mm: f64,
    pub steps_per_mm: f64,
    pub direction_invert: bool,
    pub homed: bool,
    pub limit_max_mm: f64,
    pub mm_per_rev: f64,
}

/// Result of a motion request that ran to its end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    /// Reached the (clamped) target; carries the final position.
    Completed(f64),
    /// A guarded move toward MIN hit the endstop; position is now 0.
    EndstopHit,
}

impl MoveOutcome {
    #[inline]
    pub const fn is_endstop_hit(&self) -> bool {
        matches!(self, Self::EndstopHit)
    }
}

/// Axis-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum AxisError {
    #[error("axis {axis}: feed must be a positive number (got {feed})")]
    InvalidFeed { axis: AxisId, feed: f64 },

    #[error("axis {axis}: homing failed during {phase:?} ({reason:?})")]
    HomeNotFound {
        axis: AxisId,
        phase: HomingPhase,
        reason: HomingFailReason,
    },

    #[error("axis {0}: emergency stop")]
    Estop(AxisId),

    #[error("axis {axis}: invalid {name} ({value})")]
    InvalidParameter {
        axis: AxisId,
        name: &'static str,
        value: f64,
    },
}

/// Step plan for one axis leg of a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisPlan {
    pub axis: AxisId,
    /// Target after clamping.
    pub target_mm: f64,
    pub steps: u64,
    pub direction: Direction,
    /// Absolute travel in mm.
    pub distance_mm: f64,
}

/// Controller for one stepper axis.
pub struct AxisController {
    id: AxisId,
    state: AxisState,
    channel: StepChannel,
    pub(crate) homing: HomingParams,
}

impl AxisController {
    pub fn new(
        id: AxisId,
        config: &AxisConfig,
        homing: HomingParams,
        pins: Box<dyn StepperPins>,
    ) -> Self {
        Self {
            id,
            state: AxisState {
                position_mm: 0.0,
                steps_per_mm: config.steps_per_mm,
                direction_invert: config.direction_invert,
                homed: false,
                limit_max_mm: config.limit_max_mm,
                mm_per_rev: config.mm_per_rev,
            },
            channel: StepChannel::new(pins, config.direction_invert),
            homing,
        }
    }

    #[inline]
    pub fn id(&self) -> AxisId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> &AxisState {
        &self.state
    }

    #[inline]
    pub fn position_mm(&self) -> f64 {
        self.state.position_mm
    }

    #[inline]
    pub fn is_homed(&self) -> bool {
        self.state.homed
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.channel.is_enabled()
    }

    #[inline]
    pub fn endstop_triggered(&self) -> bool {
        self.channel.endstop_triggered()
    }

    pub(crate) fn channel_mut(&mut self) -> &mut StepChannel {
        &mut self.channel
    }

    /// Drive ENABLE. Disabling drops the homing reference.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.channel.set_enabled(enabled);
        if !enabled {
            self.invalidate_homing();
        }
    }

    pub fn invalidate_homing(&mut self) {
        if self.state.homed {
            info!("Axis {}: homing reference invalidated", self.id);
        }
        self.state.homed = false;
    }

    pub(crate) fn mark_homed(&mut self) {
        self.state.position_mm = 0.0;
        self.state.homed = true;
    }

    // ─── Planning ───────────────────────────────────────────────────

    /// Clamp a target into `[0, limit_max_mm]`.
    pub fn clamp_target(&self, target_mm: f64) -> f64 {
        let clamped = target_mm.clamp(0.0, self.state.limit_max_mm);
        if clamped != target_mm {
            warn!(
                "Axis {}: target {:.3} mm clamped to {:.3} mm",
                self.id, target_mm, clamped
            );
        }
        clamped
    }

    #[inline]
    fn to_steps(&self, mm: f64) -> i64 {
        (mm * self.state.steps_per_mm).round() as i64
    }

    /// Plan a move from the current position to `target_mm` (clamped).
    pub fn plan(&self, target_mm: f64) -> AxisPlan {
        let target_mm = self.clamp_target(target_mm);
        let delta = self.to_steps(target_mm) - self.to_steps(self.state.position_mm);
        AxisPlan {
            axis: self.id,
            target_mm,
            steps: delta.unsigned_abs(),
            direction: Direction::from_delta(delta),
            distance_mm: (target_mm - self.state.position_mm).abs(),
        }
    }

    /// Check a feed in mm/s.
    pub fn validate_feed(&self, feed_mm_s: f64) -> Result<(), AxisError> {
        if feed_mm_s.is_finite() && feed_mm_s > 0.0 {
            Ok(())
        } else {
            Err(AxisError::InvalidFeed {
                axis: self.id,
                feed: feed_mm_s,
            })
        }
    }

    /// Account for `emitted` pulses in `direction` without a known target.
    pub(crate) fn advance(&mut self, emitted: u64, direction: Direction) {
        self.state.position_mm += direction.sign() * emitted as f64 / self.state.steps_per_mm;
    }

    /// Fold the result of running `plan` into the axis state.
    pub(crate) fn apply_run(&mut self, plan: &AxisPlan, emitted: u64, endstop_hit: bool) -> MoveOutcome {
        if endstop_hit {
            warn!(
                "Axis {}: endstop hit after {} of {} steps, position forced to 0",
                self.id, emitted, plan.steps
            );
            self.state.position_mm = 0.0;
            return MoveOutcome::EndstopHit;
        }
        if emitted == plan.steps {
            self.state.position_mm = plan.target_mm;
        } else {
            self.advance(emitted, plan.direction);
        }
        MoveOutcome::Completed(self.state.position_mm)
    }

    /// Record an E-STOP interruption after `emitted` pulses.
    pub(crate) fn apply_estop(&mut self, plan: &AxisPlan, emitted: u64) -> AxisError {
        self.advance(emitted, plan.direction);
        self.invalidate_homing();
        warn!(
            "Axis {}: motion stopped by E-STOP at {:.3} mm ({} of {} steps)",
            self.id, self.state.position_mm, emitted, plan.steps
        );
        AxisError::Estop(self.id)
    }

    // ─── Motion ─────────────────────────────────────────────────────

    /// Move to `target_mm` at `feed_mm_s`.
    ///
    /// A guarded move toward MIN stops at the endstop and reports
    /// [`MoveOutcome::EndstopHit`]. Moves away from MIN are never guarded:
    /// the switch may legitimately be pressed at the start.
    pub fn move_absolute(
        &mut self,
        generator: &StepPulseGenerator,
        target_mm: f64,
        feed_mm_s: f64,
        guarded: bool,
    ) -> Result<MoveOutcome, AxisError> {
        self.validate_feed(feed_mm_s)?;
        let plan = self.plan(target_mm);
        if plan.steps == 0 {
            self.state.position_mm = plan.target_mm;
            return Ok(MoveOutcome::Completed(plan.target_mm));
        }

        let train = PulseTrain::new(
            plan.steps,
            feed_mm_s * self.state.steps_per_mm,
            plan.direction,
        )
        .guarded(guarded && plan.direction == Direction::TowardMin);

        debug!(
            "Axis {}: {:.3} -> {:.3} mm ({} steps, {:.1} mm/s{})",
            self.id,
            self.state.position_mm,
            plan.target_mm,
            plan.steps,
            feed_mm_s,
            if train.abort_if_endstop { ", guarded" } else { "" }
        );

        match generator.generate(&mut self.channel, &train) {
            PulseOutcome::Completed(n) | PulseOutcome::DeadlineExpired(n) => {
                Ok(self.apply_run(&plan, n, false))
            }
            PulseOutcome::AbortedAtEndstop(n) => Ok(self.apply_run(&plan, n, true)),
            PulseOutcome::AbortedByEstop(n) => Err(self.apply_estop(&plan, n)),
        }
    }

    /// Relative move.
    pub fn jog(
        &mut self,
        generator: &StepPulseGenerator,
        delta_mm: f64,
        feed_mm_s: f64,
        guarded: bool,
    ) -> Result<MoveOutcome, AxisError> {
        let target = self.state.position_mm + delta_mm;
        self.move_absolute(generator, target, feed_mm_s, guarded)
    }

    // ─── Parameters ─────────────────────────────────────────────────

    /// Declare the current position to be 0 mm. Homing status is kept.
    pub fn set_zero(&mut self) {
        info!(
            "Axis {}: zero set at former {:.3} mm",
            self.id, self.state.position_mm
        );
        self.state.position_mm = 0.0;
    }

    /// Reject a travel limit that is not positive or lies below the
    /// current position.
    pub fn check_limit(&self, limit_max_mm: f64) -> Result<(), AxisError> {
        self.require_positive("limit", limit_max_mm)?;
        if limit_max_mm < self.state.position_mm {
            return Err(AxisError::InvalidParameter {
                axis: self.id,
                name: "limit",
                value: limit_max_mm,
            });
        }
        Ok(())
    }

    pub fn set_limit(&mut self, limit_max_mm: f64) -> Result<(), AxisError> {
        self.check_limit(limit_max_mm)?;
        self.state.limit_max_mm = limit_max_mm;
        info!("Axis {}: travel limit set to {:.3} mm", self.id, limit_max_mm);
        Ok(())
    }

    /// Change the step resolution. The position in mm is preserved.
    pub fn set_steps_per_mm(&mut self, steps_per_mm: f64) -> Result<(), AxisError> {
        self.require_positive("steps_per_mm", steps_per_mm)?;
        self.state.steps_per_mm = steps_per_mm;
        info!("Axis {}: {:.4} steps/mm", self.id, steps_per_mm);
        Ok(())
    }

    /// Set the resolution from steps per motor revolution.
    pub fn set_steps_per_rev(&mut self, steps_per_rev: f64) -> Result<(), AxisError> {
        self.require_positive("steps_per_rev", steps_per_rev)?;
        self.set_steps_per_mm(steps_per_rev / self.state.mm_per_rev)
    }

    fn require_positive(&self, name: &'static str, value: f64) -> Result<(), AxisError> {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(AxisError::InvalidParameter {
                axis: self.id,
                name,
                value,
            })
        }
    }
}

impl fmt::Debug for AxisController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxisController")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("channel", &self.channel)
            .finish()
    }
}
