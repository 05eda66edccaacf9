//! Cycle states, events and the transition table.
//!
//! `IDLE → READY → HOMING → (MOVING_FREE | MOVING_WORK → VERIFYING →
//! LOWERING → SCREWING → RAISING)* → COMPLETED`, with ERROR, PAUSED and
//! ESTOP as exits. [`transition`] is a pure function so the whole table is
//! tested without hardware.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    Idle,
    Ready,
    Homing,
    MovingFree,
    MovingWork,
    Lowering,
    Screwing,
    Raising,
    Verifying,
    Paused,
    Error,
    Estop,
    Completed,
}

impl CycleState {
    pub const ALL: [CycleState; 13] = [
        Self::Idle,
        Self::Ready,
        Self::Homing,
        Self::MovingFree,
        Self::MovingWork,
        Self::Lowering,
        Self::Screwing,
        Self::Raising,
        Self::Verifying,
        Self::Paused,
        Self::Error,
        Self::Estop,
        Self::Completed,
    ];

    /// States in which a program is executing.
    #[inline]
    pub const fn is_running(&self) -> bool {
        matches!(
            self,
            Self::Homing
                | Self::MovingFree
                | Self::MovingWork
                | Self::Lowering
                | Self::Screwing
                | Self::Raising
                | Self::Verifying
        )
    }

    /// States that end a run and need an operator action.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Estop)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Ready => "READY",
            Self::Homing => "HOMING",
            Self::MovingFree => "MOVING_FREE",
            Self::MovingWork => "MOVING_WORK",
            Self::Lowering => "LOWERING",
            Self::Screwing => "SCREWING",
            Self::Raising => "RAISING",
            Self::Verifying => "VERIFYING",
            Self::Paused => "PAUSED",
            Self::Error => "ERROR",
            Self::Estop => "ESTOP",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event driving a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleEvent {
    /// Operator selected a device program.
    LoadDevice,
    /// Operator started the loaded program.
    Start,
    /// Next step is a free move.
    BeginFreeMove,
    /// Next step is a work move (also resumes a paused hole).
    BeginWorkMove,
    /// Table reached the hole; feed a screw.
    FeedScrew,
    ScrewPresent,
    CylinderDown,
    TorqueReached,
    TorqueMissed,
    /// Last step finished.
    ProgramDone,
    /// Actuator timeout, homing failure, link or I/O failure.
    Fault,
    Estop,
    /// Operator acknowledged COMPLETED, ERROR or PAUSED.
    Reset,
    /// Operator cleared the emergency stop.
    ClearEstop,
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Ok(CycleState),
    Rejected(&'static str),
}

/// Pure transition table.
pub fn transition(state: CycleState, event: CycleEvent) -> TransitionResult {
    use CycleEvent::*;
    use CycleState::*;

    let next = match (state, event) {
        // E-STOP wins from everywhere except itself.
        (CycleState::Estop, ClearEstop) => Ready,
        (CycleState::Estop, _) => return TransitionResult::Rejected("ESTOP: only ClearEstop allowed"),
        (_, CycleEvent::Estop) => CycleState::Estop,

        (Idle | Ready, LoadDevice) => Ready,
        (Ready, Start) => Homing,

        (Homing | MovingFree | Raising | Paused, BeginFreeMove) => MovingFree,
        (Homing | MovingFree | Raising | Paused, BeginWorkMove) => MovingWork,

        (MovingWork, FeedScrew) => Verifying,
        (Verifying, ScrewPresent) => Lowering,
        (Lowering, CylinderDown) => Screwing,
        (Screwing, TorqueReached) => Raising,
        (Screwing, TorqueMissed) => Paused,

        (Homing | MovingFree | Raising, ProgramDone) => Completed,

        (s, Fault) if s.is_running() => CycleState::Error,

        (Completed | CycleState::Error | Paused, Reset) => Ready,

        _ => return TransitionResult::Rejected(rejection_reason(state, event)),
    };
    TransitionResult::Ok(next)
}

fn rejection_reason(state: CycleState, event: CycleEvent) -> &'static str {
    use CycleEvent::*;
    use CycleState::*;
    match (state, event) {
        (_, LoadDevice) => "LoadDevice only allowed in IDLE or READY",
        (Idle, Start) => "Start: no device loaded",
        (_, Start) => "Start only allowed in READY",
        (_, Reset) => "Reset only allowed in COMPLETED, ERROR or PAUSED",
        (_, ClearEstop) => "ClearEstop only allowed in ESTOP",
        (_, Fault) => "Fault only applies to a running cycle",
        (Idle | Ready | Completed | CycleState::Error, _) => "no program running",
        _ => "event out of sequence",
    }
}

/// Status snapshot published by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStatus {
    pub state: CycleState,
    pub current_device: Option<String>,
    pub current_step: Option<usize>,
    pub holes_completed: u32,
    pub total_holes: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Operator-facing message (PAUSED reason, E-STOP hint).
    pub message: Option<String>,
    pub cycle_count: u64,
}

impl Default for CycleStatus {
    fn default() -> Self {
        Self {
            state: CycleState::Idle,
            current_device: None,
            current_step: None,
            holes_completed: 0,
            total_holes: 0,
            error_code: None,
            error_message: None,
            message: None,
            cycle_count: 0,
        }
    }
}

impl CycleStatus {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Read-only view of the status for other threads.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<CycleStatus>>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> CycleStatus {
        self.inner.read().clone()
    }

    #[inline]
    pub fn state(&self) -> CycleState {
        self.inner.read().state
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut CycleStatus) -> R) -> R {
        f(&mut self.inner.write())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
