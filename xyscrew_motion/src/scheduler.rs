//! Coordinated two-axis moves.
//!
//! Both axes run on one tick timeline. The axis with more steps (the
//! *major* axis, X on ties) pulses on every tick; the *minor* axis pulses
//! according to a [`RemainderAccumulator`]:
//!
//! ```text
//! acc := 0
//! every tick: acc += minor; if acc >= major { acc -= major; pulse minor }
//! ```
//!
//! After `t` ticks the minor axis has emitted exactly `floor(t·minor/major)`
//! pulses, so both axes emit their last pulse on tick `major` and neither
//! arrives early.
//!
//! The tick period is the straight-line duration `hypot(dx, dy) / speed`
//! divided by the major step count, clamped to the minimum step period.

use std::time::Duration;

use tracing::debug;

use crate::axis::{AxisController, AxisError, AxisId, AxisPlan, MoveOutcome};
use crate::pins::{Direction, EndstopState};
use crate::pulse::{PulseTiming, StepPulseGenerator};

// ─── Accumulator ────────────────────────────────────────────────────

/// Yields, for each of `major` ticks, whether the minor axis pulses.
#[derive(Debug, Clone)]
pub struct RemainderAccumulator {
    major: u64,
    minor: u64,
    acc: u64,
    tick: u64,
}

impl RemainderAccumulator {
    /// `minor` is capped at `major`.
    pub fn new(major: u64, minor: u64) -> Self {
        Self {
            major,
            minor: minor.min(major),
            acc: 0,
            tick: 0,
        }
    }
}

impl Iterator for RemainderAccumulator {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.tick >= self.major {
            return None;
        }
        self.tick += 1;
        self.acc += self.minor;
        if self.acc >= self.major {
            self.acc -= self.major;
            Some(true)
        } else {
            Some(false)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.major - self.tick) as usize;
        (left, Some(left))
    }
}

// ─── Plan ───────────────────────────────────────────────────────────

/// Tick timeline for one coordinated move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterleavePlan {
    pub major: AxisId,
    pub major_steps: u64,
    pub minor_steps: u64,
    /// Straight-line duration at the requested speed.
    pub duration: Duration,
    pub tick: Duration,
}

impl InterleavePlan {
    pub fn new(x: &AxisPlan, y: &AxisPlan, feed_mm_s: f64, timing: &PulseTiming) -> Self {
        let (major, major_steps, minor_steps) = if x.steps >= y.steps {
            (AxisId::X, x.steps, y.steps)
        } else {
            (AxisId::Y, y.steps, x.steps)
        };
        let seconds = x.distance_mm.hypot(y.distance_mm) / feed_mm_s;
        let duration = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
        let tick = if major_steps == 0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(seconds / major_steps as f64)
                .unwrap_or(Duration::ZERO)
                .max(timing.min_period())
        };
        Self {
            major,
            major_steps,
            minor_steps,
            duration,
            tick,
        }
    }
}

// ─── Outcome ────────────────────────────────────────────────────────

/// Per-axis result of a coordinated move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualOutcome {
    pub x: MoveOutcome,
    pub y: MoveOutcome,
    /// Ticks actually run.
    pub ticks: u64,
    /// Tick of each axis' last pulse (index by [`AxisId::index`]), 0 if idle.
    pub finish_tick: [u64; 2],
}

impl DualOutcome {
    pub fn get(&self, axis: AxisId) -> MoveOutcome {
        match axis {
            AxisId::X => self.x,
            AxisId::Y => self.y,
        }
    }

    /// Axes that stopped on their endstop.
    pub fn endstops(&self) -> EndstopState {
        let mut state = EndstopState::empty();
        state.set(EndstopState::X_MIN, self.x.is_endstop_hit());
        state.set(EndstopState::Y_MIN, self.y.is_endstop_hit());
        state
    }
}

#[derive(Debug, Clone, Copy)]
struct Lane {
    steps: u64,
    direction: Direction,
    guarded: bool,
    emitted: u64,
    stopped: bool,
    finish_tick: u64,
}

impl Lane {
    fn new(plan: &AxisPlan, guarded: bool) -> Self {
        Self {
            steps: plan.steps,
            direction: plan.direction,
            guarded: guarded && plan.steps > 0 && plan.direction == Direction::TowardMin,
            emitted: 0,
            stopped: false,
            finish_tick: 0,
        }
    }

    #[inline]
    fn finished(&self) -> bool {
        self.stopped || self.emitted == self.steps
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

/// Runs coordinated X/Y moves on one generator's clock and E-STOP latch.
pub struct DualAxisScheduler<'g> {
    generator: &'g StepPulseGenerator,
}

impl<'g> DualAxisScheduler<'g> {
    pub fn new(generator: &'g StepPulseGenerator) -> Self {
        Self { generator }
    }

    /// Move both axes to `(target_x, target_y)` (each clamped) so they
    /// start and finish together.
    ///
    /// When `guarded`, each axis moving toward MIN stops independently on
    /// its own endstop while the other continues. E-STOP stops both within
    /// one tick, keeps the emitted positions and clears both homed flags.
    pub fn move_to(
        &self,
        x: &mut AxisController,
        y: &mut AxisController,
        target_x: f64,
        target_y: f64,
        feed_mm_s: f64,
        guarded: bool,
    ) -> Result<DualOutcome, AxisError> {
        x.validate_feed(feed_mm_s)?;
        let plans = [x.plan(target_x), y.plan(target_y)];
        let timing = *self.generator.timing();
        let plan = InterleavePlan::new(&plans[0], &plans[1], feed_mm_s, &timing);
        let mut lanes = [Lane::new(&plans[0], guarded), Lane::new(&plans[1], guarded)];

        if plan.major_steps > 0 {
            debug!(
                "XY move ({:.3}, {:.3}) -> ({:.3}, {:.3}): major {} {} ticks of {:?}, minor {} steps",
                x.position_mm(),
                y.position_mm(),
                plans[0].target_mm,
                plans[1].target_mm,
                plan.major,
                plan.major_steps,
                plan.tick,
                plan.minor_steps
            );
        }

        let clock = self.generator.clock();
        let estop = self.generator.estop();
        let (high, low) = timing.phases(plan.tick);
        let major = plan.major.index();
        let minor = 1 - major;
        let mut channels = [x.channel_mut(), y.channel_mut()];

        let mut setup = false;
        for (lane, channel) in lanes.iter().zip(channels.iter_mut()) {
            if lane.steps > 0 && channel.prepare_direction(lane.direction) {
                setup = true;
            }
        }
        if setup {
            clock.sleep(timing.dir_setup);
        }

        let mut interrupted = false;
        let mut ticks = 0u64;
        let mut edge = clock.now();
        for (i, minor_due) in RemainderAccumulator::new(plan.major_steps, plan.minor_steps).enumerate() {
            if estop.is_active() {
                interrupted = true;
                break;
            }
            let tick = i as u64 + 1;
            let mut due = [false; 2];
            due[major] = true;
            due[minor] = minor_due;

            for idx in 0..2 {
                let lane = &mut lanes[idx];
                if due[idx] && lane.guarded && !lane.stopped && channels[idx].endstop_triggered() {
                    lane.stopped = true;
                    debug!("Axis {}: endstop reached at tick {}", plans[idx].axis, tick);
                }
            }
            if lanes.iter().all(Lane::finished) {
                break;
            }

            let fire = [due[0] && !lanes[0].finished(), due[1] && !lanes[1].finished()];
            edge = edge.max(clock.now());
            for idx in 0..2 {
                if fire[idx] {
                    channels[idx].set_step(true);
                }
            }
            edge += high;
            clock.sleep_until(edge);
            for idx in 0..2 {
                if fire[idx] {
                    channels[idx].set_step(false);
                    lanes[idx].emitted += 1;
                    lanes[idx].finish_tick = tick;
                }
            }
            edge += low;
            clock.sleep_until(edge);
            ticks = tick;
        }

        if interrupted {
            let err = x.apply_estop(&plans[0], lanes[0].emitted);
            y.apply_estop(&plans[1], lanes[1].emitted);
            return Err(err);
        }

        Ok(DualOutcome {
            x: x.apply_run(&plans[0], lanes[0].emitted, lanes[0].stopped),
            y: y.apply_run(&plans[1], lanes[1].emitted, lanes[1].stopped),
            ticks,
            finish_tick: [lanes[0].finish_tick, lanes[1].finish_tick],
        })
    }
}
