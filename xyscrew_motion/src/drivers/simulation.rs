//! Simulated stepper axis.
//!
//! [`SimAxis`] counts STEP rising edges into a physical carriage position
//! and derives the MIN endstop from it (triggered at or below 0 mm). A
//! disabled driver ignores pulses, like real hardware.
//!
//! Handles are cheap clones sharing one state, so a test keeps a handle
//! while the controller owns another.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;
use xyscrew_common::safety::{EstopCause, EstopLatch};

use crate::axis::AxisId;
use crate::config::MotionConfig;
use crate::pins::StepperPins;

pub const DRIVER_NAME: &str = "simulation";

/// Factory registered under [`DRIVER_NAME`].
pub fn create_pins(axis: AxisId, config: &MotionConfig) -> Box<dyn StepperPins> {
    let axis_config = config.axes.get(axis);
    Box::new(
        SimAxis::new(axis_config.steps_per_mm, config.simulation.start_mm(axis))
            .with_invert(axis_config.direction_invert),
    )
}

const ENDSTOP_NATURAL: u8 = 0;
const ENDSTOP_FORCED_OPEN: u8 = 1;
const ENDSTOP_FORCED_TRIGGERED: u8 = 2;

#[derive(Debug)]
struct SimState {
    steps_per_mm: f64,
    invert: AtomicBool,
    position_steps: AtomicI64,
    dir_positive: AtomicBool,
    step_high: AtomicBool,
    enabled: AtomicBool,
    pulses: AtomicU64,
    endstop_mode: AtomicU8,
    estop_trip: Mutex<Option<(u64, EstopLatch, EstopCause)>>,
}

/// Shared handle to one simulated axis.
#[derive(Debug, Clone)]
pub struct SimAxis {
    state: Arc<SimState>,
}

impl SimAxis {
    /// Axis with its carriage physically at `start_mm`.
    pub fn new(steps_per_mm: f64, start_mm: f64) -> Self {
        Self {
            state: Arc::new(SimState {
                steps_per_mm,
                invert: AtomicBool::new(false),
                position_steps: AtomicI64::new((start_mm * steps_per_mm).round() as i64),
                dir_positive: AtomicBool::new(true),
                step_high: AtomicBool::new(false),
                enabled: AtomicBool::new(false),
                pulses: AtomicU64::new(0),
                endstop_mode: AtomicU8::new(ENDSTOP_NATURAL),
                estop_trip: Mutex::new(None),
            }),
        }
    }

    /// Interpret DIR with inverted polarity. Must match the axis config.
    pub fn with_invert(self, invert: bool) -> Self {
        self.state.invert.store(invert, Ordering::SeqCst);
        self
    }

    /// Physical carriage position.
    pub fn position_mm(&self) -> f64 {
        self.state.position_steps.load(Ordering::SeqCst) as f64 / self.state.steps_per_mm
    }

    /// Move the carriage by hand.
    pub fn set_position_mm(&self, mm: f64) {
        self.state
            .position_steps
            .store((mm * self.state.steps_per_mm).round() as i64, Ordering::SeqCst);
    }

    /// Total rising STEP edges seen.
    pub fn pulses(&self) -> u64 {
        self.state.pulses.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    /// Override the endstop reading (`None` restores position-derived).
    pub fn force_endstop(&self, level: Option<bool>) {
        let mode = match level {
            None => ENDSTOP_NATURAL,
            Some(false) => ENDSTOP_FORCED_OPEN,
            Some(true) => ENDSTOP_FORCED_TRIGGERED,
        };
        self.state.endstop_mode.store(mode, Ordering::SeqCst);
    }

    /// Assert `latch` when the total pulse count reaches `pulses`.
    pub fn trip_estop_after(&self, pulses: u64, latch: EstopLatch, cause: EstopCause) {
        *self.state.estop_trip.lock() = Some((pulses, latch, cause));
    }

    fn on_rising_edge(&self) {
        let count = self.state.pulses.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.enabled.load(Ordering::SeqCst) {
            let delta = if self.state.dir_positive.load(Ordering::SeqCst) {
                1
            } else {
                -1
            };
            self.state.position_steps.fetch_add(delta, Ordering::SeqCst);
        }
        let mut trip = self.state.estop_trip.lock();
        if trip.as_ref().is_some_and(|(at, _, _)| *at == count)
            && let Some((_, latch, cause)) = trip.take()
        {
            latch.trigger(cause);
        }
    }
}

impl StepperPins for SimAxis {
    fn set_direction(&mut self, level: bool) {
        self.state
            .dir_positive
            .store(level != self.state.invert.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    fn set_step(&mut self, high: bool) {
        let was_high = self.state.step_high.swap(high, Ordering::SeqCst);
        if high && !was_high {
            self.on_rising_edge();
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
    }

    fn endstop_triggered(&self) -> bool {
        match self.state.endstop_mode.load(Ordering::SeqCst) {
            ENDSTOP_FORCED_OPEN => false,
            ENDSTOP_FORCED_TRIGGERED => true,
            _ => self.state.position_steps.load(Ordering::SeqCst) <= 0,
        }
    }
}
