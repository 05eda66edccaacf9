//! Step driver pin interface.
//!
//! One `StepperPins` implementation per axis wraps the STEP, DIR and ENABLE
//! outputs of a stepper driver plus the axis MIN endstop input.

use bitflags::bitflags;

/// Travel direction relative to the MIN endstop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Decreasing position, toward the MIN endstop.
    TowardMin,
    /// Increasing position, away from the MIN endstop.
    TowardMax,
}

impl Direction {
    /// Direction needed to cover a signed step delta.
    #[inline]
    pub const fn from_delta(delta: i64) -> Self {
        if delta < 0 {
            Self::TowardMin
        } else {
            Self::TowardMax
        }
    }

    /// Position sign of one step in this direction.
    #[inline]
    pub const fn sign(&self) -> f64 {
        match self {
            Self::TowardMin => -1.0,
            Self::TowardMax => 1.0,
        }
    }

    /// Electrical DIR level for this direction.
    #[inline]
    pub const fn level(&self, invert: bool) -> bool {
        let positive = matches!(self, Self::TowardMax);
        positive != invert
    }
}

/// Hardware outputs/inputs of one stepper axis.
///
/// Implementations must be cheap: they are called from the pulse loop
/// twice per step.
pub trait StepperPins: Send {
    /// Drive the DIR output to the given electrical level.
    fn set_direction(&mut self, level: bool);

    /// Drive the STEP output. A rising edge moves the motor one step.
    fn set_step(&mut self, high: bool);

    /// Drive the ENABLE output.
    fn set_enabled(&mut self, enabled: bool);

    /// Debounced MIN endstop input.
    fn endstop_triggered(&self) -> bool;
}

bitflags! {
    /// Snapshot of the MIN endstop inputs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EndstopState: u8 {
        /// X MIN endstop triggered.
        const X_MIN = 0x01;
        /// Y MIN endstop triggered.
        const Y_MIN = 0x02;
    }
}
