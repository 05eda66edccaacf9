//! Axis homing against the MIN endstop.
//!
//! ## Sequence
//!
//! | Phase | Motion | Ends when |
//! |-------|--------|-----------|
//! | `InitialBackOff` | only if the switch is already pressed: back off `backoff_mm` at slow feed | distance covered; switch must have released |
//! | `FastApproach` | toward MIN at fast feed, capped at 1.5 × (limit + backoff) | endstop triggers |
//! | `BackOff` | away from MIN by `backoff_mm` at slow feed | distance covered; switch must have released |
//! | `SlowApproach` | toward MIN at slow feed, capped at 2 × backoff | endstop triggers |
//! | `Complete` | position := 0, homed := true | |
//!
//! All phases share one deadline of `homing.timeout_s` taken when the
//! sequence starts. Expiry, an exhausted approach or a switch that never
//! releases fails the sequence with [`AxisError::HomeNotFound`]; the axis
//! is left unhomed.

use std::time::Duration;

use tracing::{debug, info, warn};
use xyscrew_common::wait::Deadline;

use crate::axis::{AxisController, AxisError};
use crate::config::HomingConfig;
use crate::pins::Direction;
use crate::pulse::{PulseOutcome, PulseTrain, StepPulseGenerator};

/// Fast approach travel cap relative to the full axis travel.
const APPROACH_TRAVEL_FACTOR: f64 = 1.5;

// ─── Parameters ─────────────────────────────────────────────────────

/// Homing parameters in controller units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomingParams {
    pub backoff_mm: f64,
    pub fast_feed_mm_s: f64,
    pub slow_feed_mm_s: f64,
    pub timeout: Duration,
}

impl From<&HomingConfig> for HomingParams {
    fn from(config: &HomingConfig) -> Self {
        Self {
            backoff_mm: config.backoff_mm,
            fast_feed_mm_s: config.fast_mm_min / 60.0,
            slow_feed_mm_s: config.slow_mm_min / 60.0,
            timeout: config.timeout(),
        }
    }
}

// ─── Phases ─────────────────────────────────────────────────────────

/// Phase of the homing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    Idle,
    InitialBackOff,
    FastApproach,
    BackOff,
    SlowApproach,
    Complete,
}

/// Why a homing sequence failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingFailReason {
    /// Overall homing deadline expired.
    Timeout,
    /// Approach travel exhausted without the switch triggering.
    NotFound,
    /// Switch still pressed after backing off.
    StuckSwitch,
}

// ─── Sequence ───────────────────────────────────────────────────────

struct HomingRun<'a> {
    axis: &'a mut AxisController,
    generator: &'a StepPulseGenerator,
    params: HomingParams,
    deadline: Deadline,
    phase: HomingPhase,
}

impl HomingRun<'_> {
    fn execute(mut self, backoff_steps: u64, approach_steps: u64) -> Result<(), AxisError> {
        let slow = self.params.slow_feed_mm_s;
        let fast = self.params.fast_feed_mm_s;

        if self.axis.endstop_triggered() {
            self.run(HomingPhase::InitialBackOff, backoff_steps, slow, Direction::TowardMax, false)?;
            if self.axis.endstop_triggered() {
                return Err(self.fail(HomingFailReason::StuckSwitch));
            }
        }

        let outcome =
            self.run(HomingPhase::FastApproach, approach_steps, fast, Direction::TowardMin, true)?;
        if !matches!(outcome, PulseOutcome::AbortedAtEndstop(_)) {
            return Err(self.fail(HomingFailReason::NotFound));
        }

        self.run(HomingPhase::BackOff, backoff_steps, slow, Direction::TowardMax, false)?;
        if self.axis.endstop_triggered() {
            return Err(self.fail(HomingFailReason::StuckSwitch));
        }

        let outcome = self.run(
            HomingPhase::SlowApproach,
            backoff_steps * 2,
            slow,
            Direction::TowardMin,
            true,
        )?;
        if !matches!(outcome, PulseOutcome::AbortedAtEndstop(_)) {
            return Err(self.fail(HomingFailReason::NotFound));
        }

        self.phase = HomingPhase::Complete;
        Ok(())
    }

    /// Run one phase. E-STOP and deadline expiry end the sequence.
    fn run(
        &mut self,
        phase: HomingPhase,
        steps: u64,
        feed_mm_s: f64,
        direction: Direction,
        guarded: bool,
    ) -> Result<PulseOutcome, AxisError> {
        self.phase = phase;
        debug!("Axis {}: homing phase {:?} ({} steps max)", self.axis.id(), phase, steps);

        let train = PulseTrain::new(steps, feed_mm_s * self.axis.state().steps_per_mm, direction)
            .guarded(guarded)
            .with_deadline(self.deadline);
        let outcome = self.generator.generate(self.axis.channel_mut(), &train);
        self.axis.advance(outcome.emitted(), direction);

        match outcome {
            PulseOutcome::AbortedByEstop(_) => {
                warn!("Axis {}: homing interrupted by E-STOP in {:?}", self.axis.id(), phase);
                Err(AxisError::Estop(self.axis.id()))
            }
            PulseOutcome::DeadlineExpired(_) => Err(self.fail(HomingFailReason::Timeout)),
            other => Ok(other),
        }
    }

    fn fail(&self, reason: HomingFailReason) -> AxisError {
        warn!(
            "Axis {}: homing failed in {:?} ({:?})",
            self.axis.id(),
            self.phase,
            reason
        );
        AxisError::HomeNotFound {
            axis: self.axis.id(),
            phase: self.phase,
            reason,
        }
    }
}

impl AxisController {
    /// Establish the zero reference against the MIN endstop.
    ///
    /// Enables the driver and clears the homed flag before any motion. On
    /// success the position is exactly 0 and the axis is homed.
    pub fn home(&mut self, generator: &StepPulseGenerator) -> Result<(), AxisError> {
        let params = self.homing;
        self.invalidate_homing();
        self.set_enabled(true);

        let steps_per_mm = self.state().steps_per_mm;
        let backoff_steps = ((params.backoff_mm * steps_per_mm).round() as u64).max(1);
        let approach_steps = ((self.state().limit_max_mm + params.backoff_mm)
            * APPROACH_TRAVEL_FACTOR
            * steps_per_mm)
            .ceil() as u64;

        info!(
            "Axis {}: homing started (timeout {:?})",
            self.id(),
            params.timeout
        );
        let deadline = Deadline::after(generator.clock().as_ref(), params.timeout);
        let run = HomingRun {
            axis: self,
            generator,
            params,
            deadline,
            phase: HomingPhase::Idle,
        };
        run.execute(backoff_steps, approach_steps)?;

        self.mark_homed();
        info!("Axis {}: homed", self.id());
        Ok(())
    }
}
