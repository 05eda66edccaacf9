//! Step pulse generation.
//!
//! A [`StepPulseGenerator`] emits a finite train of STEP pulses on one
//! [`StepChannel`]. Before every pulse it checks, in order:
//!
//! 1. the E-STOP latch,
//! 2. the endstop (only for trains flagged `abort_if_endstop`),
//! 3. the optional deadline.
//!
//! Edges are paced against absolute clock deadlines. A late edge is rebased
//! to "now" so the configured minimum widths are always honored.

use std::time::Duration;

use tracing::{debug, trace};
use xyscrew_common::safety::EstopLatch;
use xyscrew_common::time::SharedClock;
use xyscrew_common::wait::Deadline;

use crate::config::PulseConfig;
use crate::pins::{Direction, StepperPins};

// ─── Timing ─────────────────────────────────────────────────────────

/// Electrical timing limits for the STEP/DIR outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseTiming {
    pub max_step_hz: f64,
    pub min_pulse: Duration,
    pub dir_setup: Duration,
}

impl PulseTiming {
    pub fn from_config(config: &PulseConfig) -> Self {
        Self {
            max_step_hz: config.max_step_hz,
            min_pulse: Duration::from_micros(config.min_pulse_us),
            dir_setup: Duration::from_micros(config.dir_setup_us),
        }
    }

    /// Shortest legal step period.
    pub fn min_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_step_hz).max(self.min_pulse * 2)
    }

    /// Period for a requested frequency, clamped to `max_step_hz`.
    ///
    /// Returns `None` for zero, negative or non-finite frequencies.
    pub fn period_for(&self, freq_hz: f64) -> Option<Duration> {
        if !(freq_hz.is_finite() && freq_hz > 0.0) {
            return None;
        }
        let freq = freq_hz.min(self.max_step_hz);
        Some(Duration::from_secs_f64(1.0 / freq).max(self.min_period()))
    }

    /// Split a period into (high, low) phase durations.
    pub fn phases(&self, period: Duration) -> (Duration, Duration) {
        let high = self.min_pulse.max(period / 2);
        let low = self.min_pulse.max(period.saturating_sub(high));
        (high, low)
    }
}

// ─── Channel ────────────────────────────────────────────────────────

/// One axis' driver outputs plus the DIR state last written to them.
pub struct StepChannel {
    pins: Box<dyn StepperPins>,
    invert: bool,
    last_direction: Option<Direction>,
    enabled: bool,
}

impl StepChannel {
    pub fn new(pins: Box<dyn StepperPins>, invert: bool) -> Self {
        Self {
            pins,
            invert,
            last_direction: None,
            enabled: false,
        }
    }

    /// Write DIR if it differs from the last written direction.
    ///
    /// Returns `true` when the pin changed and the caller owes a setup delay.
    pub fn prepare_direction(&mut self, direction: Direction) -> bool {
        if self.last_direction == Some(direction) {
            return false;
        }
        self.pins.set_direction(direction.level(self.invert));
        self.last_direction = Some(direction);
        true
    }

    #[inline]
    pub fn set_step(&mut self, high: bool) {
        self.pins.set_step(high);
    }

    #[inline]
    pub fn endstop_triggered(&self) -> bool {
        self.pins.endstop_triggered()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.pins.set_enabled(enabled);
        self.enabled = enabled;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl std::fmt::Debug for StepChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepChannel")
            .field("invert", &self.invert)
            .field("last_direction", &self.last_direction)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ─── Trains ─────────────────────────────────────────────────────────

/// A finite request for `steps` pulses.
#[derive(Debug, Clone, Copy)]
pub struct PulseTrain {
    pub steps: u64,
    pub freq_hz: f64,
    pub direction: Direction,
    /// Stop as soon as the channel's endstop reads triggered.
    pub abort_if_endstop: bool,
    pub deadline: Option<Deadline>,
}

impl PulseTrain {
    pub fn new(steps: u64, freq_hz: f64, direction: Direction) -> Self {
        Self {
            steps,
            freq_hz,
            direction,
            abort_if_endstop: false,
            deadline: None,
        }
    }

    pub fn guarded(mut self, guarded: bool) -> Self {
        self.abort_if_endstop = guarded;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// How a train ended. Every variant carries the exact number of pulses
/// emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseOutcome {
    Completed(u64),
    AbortedAtEndstop(u64),
    AbortedByEstop(u64),
    DeadlineExpired(u64),
}

impl PulseOutcome {
    #[inline]
    pub const fn emitted(&self) -> u64 {
        match self {
            Self::Completed(n)
            | Self::AbortedAtEndstop(n)
            | Self::AbortedByEstop(n)
            | Self::DeadlineExpired(n) => *n,
        }
    }
}

// ─── Generator ──────────────────────────────────────────────────────

/// Emits timed step trains.
#[derive(Clone)]
pub struct StepPulseGenerator {
    timing: PulseTiming,
    clock: SharedClock,
    estop: EstopLatch,
}

impl StepPulseGenerator {
    pub fn new(timing: PulseTiming, clock: SharedClock, estop: EstopLatch) -> Self {
        Self {
            timing,
            clock,
            estop,
        }
    }

    #[inline]
    pub fn timing(&self) -> &PulseTiming {
        &self.timing
    }

    #[inline]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    #[inline]
    pub fn estop(&self) -> &EstopLatch {
        &self.estop
    }

    /// Emit `train` on `channel`.
    ///
    /// Zero steps or an invalid frequency complete immediately without
    /// touching the pins.
    pub fn generate(&self, channel: &mut StepChannel, train: &PulseTrain) -> PulseOutcome {
        if train.steps == 0 {
            return PulseOutcome::Completed(0);
        }
        let Some(period) = self.timing.period_for(train.freq_hz) else {
            debug!("Rejected pulse train with frequency {}", train.freq_hz);
            return PulseOutcome::Completed(0);
        };
        let (high, low) = self.timing.phases(period);

        if channel.prepare_direction(train.direction) {
            self.clock.sleep(self.timing.dir_setup);
        }

        let mut emitted = 0u64;
        let mut edge = self.clock.now();
        let outcome = loop {
            if emitted == train.steps {
                break PulseOutcome::Completed(emitted);
            }
            if let Some(aborted) = self.check_abort(channel, train, emitted) {
                break aborted;
            }

            edge = edge.max(self.clock.now());
            channel.set_step(true);
            edge += high;
            self.clock.sleep_until(edge);
            channel.set_step(false);
            emitted += 1;
            edge += low;
            self.clock.sleep_until(edge);
        };

        trace!(
            "Pulse train {:?} x{} @ {:.0} Hz -> {:?}",
            train.direction, train.steps, train.freq_hz, outcome
        );
        outcome
    }

    /// Abort checks performed before every pulse.
    pub(crate) fn check_abort(
        &self,
        channel: &StepChannel,
        train: &PulseTrain,
        emitted: u64,
    ) -> Option<PulseOutcome> {
        if self.estop.is_active() {
            return Some(PulseOutcome::AbortedByEstop(emitted));
        }
        if train.abort_if_endstop && channel.endstop_triggered() {
            return Some(PulseOutcome::AbortedAtEndstop(emitted));
        }
        if let Some(deadline) = train.deadline
            && deadline.expired(self.clock.as_ref())
        {
            return Some(PulseOutcome::DeadlineExpired(emitted));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use xyscrew_common::safety::EstopCause;
    use xyscrew_common::time::{Clock, SimClock};

    /// Pins that count rising edges and can trip the endstop or E-STOP
    /// after a given number of pulses.
    #[derive(Clone, Default)]
    struct CountingPins {
        rising: Arc<AtomicU64>,
        dir_writes: Arc<AtomicU64>,
        endstop: Arc<AtomicBool>,
        trip_endstop_at: Option<u64>,
        trip_estop_at: Option<(u64, EstopLatch)>,
        step_high: bool,
    }

    impl StepperPins for CountingPins {
        fn set_direction(&mut self, _level: bool) {
            self.dir_writes.fetch_add(1, Ordering::SeqCst);
        }

        fn set_step(&mut self, high: bool) {
            if high && !self.step_high {
                let n = self.rising.fetch_add(1, Ordering::SeqCst) + 1;
                if self.trip_endstop_at == Some(n) {
                    self.endstop.store(true, Ordering::SeqCst);
                }
                if let Some((at, latch)) = &self.trip_estop_at
                    && *at == n
                {
                    latch.trigger(EstopCause::Operator);
                }
            }
            self.step_high = high;
        }

        fn set_enabled(&mut self, _enabled: bool) {}

        fn endstop_triggered(&self) -> bool {
            self.endstop.load(Ordering::SeqCst)
        }
    }

    fn timing() -> PulseTiming {
        PulseTiming {
            max_step_hz: 20_000.0,
            min_pulse: Duration::from_micros(5),
            dir_setup: Duration::from_micros(5),
        }
    }

    fn generator(clock: &SimClock, latch: &EstopLatch) -> StepPulseGenerator {
        StepPulseGenerator::new(timing(), clock.shared(), latch.clone())
    }

    #[test]
    fn period_is_clamped_to_max_rate() {
        let t = timing();
        assert_eq!(t.min_period(), Duration::from_micros(50));
        assert_eq!(t.period_for(1_000_000.0), Some(Duration::from_micros(50)));
        assert_eq!(t.period_for(1000.0), Some(Duration::from_millis(1)));
        assert_eq!(t.period_for(0.0), None);
        assert_eq!(t.period_for(f64::NAN), None);
    }

    #[test]
    fn phases_respect_minimum_width() {
        let t = PulseTiming {
            max_step_hz: 1_000_000.0,
            min_pulse: Duration::from_micros(5),
            dir_setup: Duration::ZERO,
        };
        let (high, low) = t.phases(Duration::from_micros(6));
        assert_eq!(high, Duration::from_micros(5));
        assert_eq!(low, Duration::from_micros(5));
        let (high, low) = t.phases(Duration::from_micros(100));
        assert_eq!(high, Duration::from_micros(50));
        assert_eq!(low, Duration::from_micros(50));
    }

    #[test]
    fn completes_exact_count_at_requested_rate() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        let pins = CountingPins::default();
        let rising = pins.rising.clone();
        let mut channel = StepChannel::new(Box::new(pins), false);

        let train = PulseTrain::new(1000, 1000.0, Direction::TowardMax);
        let outcome = generator(&clock, &latch).generate(&mut channel, &train);

        assert_eq!(outcome, PulseOutcome::Completed(1000));
        assert_eq!(rising.load(Ordering::SeqCst), 1000);
        // 1000 periods of 1 ms plus the initial DIR setup
        assert_eq!(clock.now(), Duration::from_secs(1) + Duration::from_micros(5));
    }

    #[test]
    fn zero_steps_touch_nothing() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        let pins = CountingPins::default();
        let dir_writes = pins.dir_writes.clone();
        let mut channel = StepChannel::new(Box::new(pins), false);

        let outcome = generator(&clock, &latch)
            .generate(&mut channel, &PulseTrain::new(0, 1000.0, Direction::TowardMin));

        assert_eq!(outcome, PulseOutcome::Completed(0));
        assert_eq!(dir_writes.load(Ordering::SeqCst), 0);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn direction_written_only_on_change() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        let pins = CountingPins::default();
        let dir_writes = pins.dir_writes.clone();
        let mut channel = StepChannel::new(Box::new(pins), false);
        let generator = generator(&clock, &latch);

        generator.generate(&mut channel, &PulseTrain::new(3, 1000.0, Direction::TowardMax));
        generator.generate(&mut channel, &PulseTrain::new(3, 1000.0, Direction::TowardMax));
        assert_eq!(dir_writes.load(Ordering::SeqCst), 1);
        generator.generate(&mut channel, &PulseTrain::new(3, 1000.0, Direction::TowardMin));
        assert_eq!(dir_writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn guarded_train_stops_at_endstop() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        let pins = CountingPins {
            trip_endstop_at: Some(40),
            ..Default::default()
        };
        let rising = pins.rising.clone();
        let mut channel = StepChannel::new(Box::new(pins), false);

        let train = PulseTrain::new(100, 2000.0, Direction::TowardMin).guarded(true);
        let outcome = generator(&clock, &latch).generate(&mut channel, &train);

        assert_eq!(outcome, PulseOutcome::AbortedAtEndstop(40));
        assert_eq!(rising.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn unguarded_train_ignores_endstop() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        let pins = CountingPins {
            trip_endstop_at: Some(1),
            ..Default::default()
        };
        let mut channel = StepChannel::new(Box::new(pins), false);

        let train = PulseTrain::new(10, 2000.0, Direction::TowardMin);
        let outcome = generator(&clock, &latch).generate(&mut channel, &train);
        assert_eq!(outcome, PulseOutcome::Completed(10));
    }

    #[test]
    fn estop_aborts_within_one_pulse() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        let pins = CountingPins {
            trip_estop_at: Some((25, latch.clone())),
            ..Default::default()
        };
        let rising = pins.rising.clone();
        let mut channel = StepChannel::new(Box::new(pins), false);

        let train = PulseTrain::new(100, 1000.0, Direction::TowardMax);
        let outcome = generator(&clock, &latch).generate(&mut channel, &train);

        assert_eq!(outcome, PulseOutcome::AbortedByEstop(25));
        assert_eq!(rising.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn deadline_expiry_reports_partial_count() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        let mut channel = StepChannel::new(Box::new(CountingPins::default()), false);

        let deadline = Deadline::after(&clock, Duration::from_millis(10));
        let train =
            PulseTrain::new(1000, 1000.0, Direction::TowardMax).with_deadline(deadline);
        let outcome = generator(&clock, &latch).generate(&mut channel, &train);

        // Pulses start at 5 µs (DIR setup) and every 1 ms after that.
        assert_eq!(outcome, PulseOutcome::DeadlineExpired(10));
        assert!(clock.now() <= Duration::from_millis(10) + Duration::from_millis(1));
    }

    #[test]
    fn latched_estop_blocks_first_pulse() {
        let clock = SimClock::new();
        let latch = EstopLatch::new();
        latch.trigger(EstopCause::Command);
        let mut channel = StepChannel::new(Box::new(CountingPins::default()), false);

        let outcome = generator(&clock, &latch)
            .generate(&mut channel, &PulseTrain::new(5, 1000.0, Direction::TowardMax));
        assert_eq!(outcome, PulseOutcome::AbortedByEstop(0));
    }
}
