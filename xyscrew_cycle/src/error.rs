//! Cycle error taxonomy.
//!
//! Faults carry a stable code that ends up in `CycleStatus.error_code`.
//! Operator-side rejections (wrong state, unknown device) are returned to
//! the caller and never change the cycle state.

use std::fmt;

use thiserror::Error;
use xyscrew_common::io::{IoError, SensorLevel};
use xyscrew_common::protocol::ErrorCode;
use xyscrew_common::safety::EstopCause;

use crate::link::LinkError;
use crate::state::{CycleEvent, CycleState};

/// Watchdog-timed actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    CylinderDown,
    CylinderUp,
    Torque,
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CylinderDown => f.write_str("cylinder down"),
            Self::CylinderUp => f.write_str("cylinder up"),
            Self::Torque => f.write_str("torque"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    // ─── Faults ─────────────────────────────────────────────────────
    #[error("no screw detected after {attempts} feed attempts")]
    ScrewNotDetected { attempts: u32 },

    #[error("{0} watchdog expired")]
    ActuatorTimeout(Actuator),

    #[error("sensor '{sensor}' unexpectedly {level}")]
    UnexpectedSensorState { sensor: String, level: SensorLevel },

    #[error("homing failed: {0}")]
    Homing(ErrorCode),

    #[error("motion node rejected '{command}': {code}")]
    MotionRejected { command: String, code: ErrorCode },

    #[error("guarded move stopped on {0}")]
    EndstopAbort(String),

    #[error("motion link: {0}")]
    Link(#[from] LinkError),

    #[error("I/O: {0}")]
    Io(#[from] IoError),

    #[error("emergency stop ({0})")]
    Safety(EstopCause),

    // ─── Rejections ─────────────────────────────────────────────────
    #[error("{event:?} rejected in {state}: {reason}")]
    InvalidTransition {
        state: CycleState,
        event: CycleEvent,
        reason: &'static str,
    },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("E-STOP input still active")]
    EstopStillActive,
}

impl CycleError {
    /// Code published in `CycleStatus.error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ScrewNotDetected { .. } => "SCREW_NOT_DETECTED",
            Self::ActuatorTimeout(Actuator::CylinderDown) => "CYLINDER_DOWN_TIMEOUT",
            Self::ActuatorTimeout(Actuator::CylinderUp) => "CYLINDER_UP_TIMEOUT",
            Self::ActuatorTimeout(Actuator::Torque) => "TORQUE_NOT_REACHED",
            Self::UnexpectedSensorState { .. } => "UNEXPECTED_SENSOR",
            Self::Homing(code) if code.is_homing_failure() => code.as_str(),
            Self::Homing(_) => "HOME_NOT_FOUND",
            Self::MotionRejected { .. } => "MOTION_REJECTED",
            Self::EndstopAbort(_) => "ENDSTOP_ABORT",
            Self::Link(_) => "LINK",
            Self::Io(_) => "IO",
            Self::Safety(_) => "ESTOP",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::UnknownDevice(_) => "UNKNOWN_DEVICE",
            Self::EstopStillActive => "ESTOP_ACTIVE",
        }
    }

    /// Whether this error drives the cycle out of its running state.
    #[inline]
    pub const fn is_fault(&self) -> bool {
        !matches!(
            self,
            Self::InvalidTransition { .. } | Self::UnknownDevice(_) | Self::EstopStillActive
        )
    }

    /// Torque miss pauses instead of faulting.
    #[inline]
    pub const fn is_torque_miss(&self) -> bool {
        matches!(self, Self::ActuatorTimeout(Actuator::Torque))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(
            CycleError::ScrewNotDetected { attempts: 3 }.code(),
            "SCREW_NOT_DETECTED"
        );
        assert_eq!(
            CycleError::ActuatorTimeout(Actuator::CylinderDown).code(),
            "CYLINDER_DOWN_TIMEOUT"
        );
        assert_eq!(
            CycleError::ActuatorTimeout(Actuator::CylinderUp).code(),
            "CYLINDER_UP_TIMEOUT"
        );
        assert_eq!(CycleError::Homing(ErrorCode::HomeXNotFound).code(), "HOME_X_NOT_FOUND");
        assert_eq!(CycleError::Homing(ErrorCode::BadArgs).code(), "HOME_NOT_FOUND");
        assert_eq!(CycleError::Safety(EstopCause::Signal).code(), "ESTOP");
        assert_eq!(CycleError::EndstopAbort("ENDSTOP_X".into()).code(), "ENDSTOP_ABORT");
    }

    #[test]
    fn torque_miss_is_a_fault_that_pauses() {
        let err = CycleError::ActuatorTimeout(Actuator::Torque);
        assert!(err.is_fault());
        assert!(err.is_torque_miss());
        assert_eq!(err.code(), "TORQUE_NOT_REACHED");
    }

    #[test]
    fn rejections_are_not_faults() {
        assert!(!CycleError::UnknownDevice("x".into()).is_fault());
        assert!(!CycleError::EstopStillActive.is_fault());
    }

    #[test]
    fn messages() {
        assert_eq!(
            CycleError::UnexpectedSensorState {
                sensor: "cylinder_down".into(),
                level: SensorLevel::Active,
            }
            .to_string(),
            "sensor 'cylinder_down' unexpectedly active"
        );
        assert_eq!(
            CycleError::ActuatorTimeout(Actuator::CylinderUp).to_string(),
            "cylinder up watchdog expired"
        );
    }
}
