//! Cycle state machine.
//!
//! Drives one device program: home the table if needed, visit every step
//! in order and run the screw sequence on work steps. Operator commands
//! (`load_device`, `start`, `resume`, `reset`, `clear_estop`) are checked
//! against the transition table first; a rejected command returns an error
//! and leaves the state untouched.
//!
//! Faults are routed by kind:
//!
//! - emergency stop: station to a safe state, motion node stopped, ESTOP
//! - torque not reached: station released, PAUSED on the same hole
//! - anything else: station released, drivers off, ERROR
//!
//! ESTOP and ERROR both invalidate homing; the next start runs `G28`.

use tracing::{debug, error, info, warn};
use xyscrew_common::io::{RelayInterface, SensorInterface};
use xyscrew_common::protocol::{ErrorCode, Response};
use xyscrew_common::safety::{EstopCause, EstopLatch};
use xyscrew_common::time::SharedClock;

use crate::actuator::ScrewStation;
use crate::config::CycleConfig;
use crate::error::CycleError;
use crate::link::{LinkError, MotionLink, is_endstop_token, parse_homed};
use crate::program::{DeviceProgram, ProgramStep};
use crate::state::{CycleEvent, CycleState, CycleStatus, StatusHandle, TransitionResult, transition};

const ESTOP_HINT: &str = "Release E-STOP and clear to continue";

pub struct CycleStateMachine {
    devices: Vec<DeviceProgram>,
    park_on_complete: bool,
    station: ScrewStation,
    link: Box<dyn MotionLink>,
    status: StatusHandle,
    program: Option<DeviceProgram>,
    /// Index of the step to run next; a paused hole is retried from here.
    next_step: usize,
    needs_homing: bool,
}

impl CycleStateMachine {
    pub fn new(
        config: &CycleConfig,
        link: Box<dyn MotionLink>,
        relays: Box<dyn RelayInterface>,
        sensors: Box<dyn SensorInterface>,
        clock: SharedClock,
        estop: EstopLatch,
    ) -> Self {
        Self {
            devices: config.devices.clone(),
            park_on_complete: config.park_on_complete,
            station: ScrewStation::new(config, relays, sensors, clock, estop),
            link,
            status: StatusHandle::default(),
            program: None,
            next_step: 0,
            needs_homing: true,
        }
    }

    /// Shared status view for other threads.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    #[inline]
    pub fn state(&self) -> CycleState {
        self.status.state()
    }

    pub fn status(&self) -> CycleStatus {
        self.status.snapshot()
    }

    /// Latch shared with the station; trigger it to stop a running cycle.
    pub fn estop_latch(&self) -> EstopLatch {
        self.station.estop_latch().clone()
    }

    // ─── Operator commands ──────────────────────────────────────────

    /// Select a device program by key.
    pub fn load_device(&mut self, key: &str) -> Result<(), CycleError> {
        let program = self
            .devices
            .iter()
            .find(|d| d.key == key)
            .cloned()
            .ok_or_else(|| CycleError::UnknownDevice(key.to_string()))?;
        self.fire(CycleEvent::LoadDevice)?;

        info!(
            "Loaded device '{}' ({} steps, {} holes)",
            program.key,
            program.steps.len(),
            program.total_holes()
        );
        self.status.update(|s| {
            s.current_device = Some(program.key.clone());
            s.total_holes = program.total_holes();
            s.holes_completed = 0;
            s.current_step = None;
        });
        self.program = Some(program);
        self.next_step = 0;
        Ok(())
    }

    /// Run the loaded program to its end. Blocks until the cycle settles in
    /// COMPLETED, PAUSED, ERROR or ESTOP and returns that state.
    pub fn start(&mut self) -> Result<CycleState, CycleError> {
        self.check(CycleEvent::Start)?;
        if let Some(cause) = self.station.estop_tripped() {
            self.enter_estop(cause);
            return Ok(self.state());
        }
        self.fire(CycleEvent::Start)?;
        self.next_step = 0;
        self.status.update(|s| {
            s.holes_completed = 0;
            s.current_step = None;
            s.error_code = None;
            s.error_message = None;
            s.message = None;
        });

        let result = self.home_if_needed().and_then(|()| self.run_steps());
        Ok(self.settle(result))
    }

    /// Continue a PAUSED cycle by retrying the hole that missed torque.
    pub fn resume(&mut self) -> Result<CycleState, CycleError> {
        let state = self.state();
        if state != CycleState::Paused {
            return Err(CycleError::InvalidTransition {
                state,
                event: CycleEvent::BeginWorkMove,
                reason: "resume only allowed in PAUSED",
            });
        }
        info!("Resuming at step {}", self.next_step);
        self.status.update(|s| s.message = None);
        let result = self.run_steps();
        Ok(self.settle(result))
    }

    /// Acknowledge COMPLETED, ERROR or PAUSED and return to READY.
    pub fn reset(&mut self) -> Result<(), CycleError> {
        self.fire(CycleEvent::Reset)?;
        self.next_step = 0;
        self.status.update(|s| {
            s.current_step = None;
            s.holes_completed = 0;
            s.error_code = None;
            s.error_message = None;
            s.message = None;
        });
        Ok(())
    }

    /// Leave ESTOP once the input is released. The motion node is cleared
    /// with `M999`; the next start homes again.
    pub fn clear_estop(&mut self) -> Result<(), CycleError> {
        self.check(CycleEvent::ClearEstop)?;
        if self.station.estop_input()?.is_active() {
            return Err(CycleError::EstopStillActive);
        }
        match self.link.request("M999")? {
            Response::Ok(_) => {}
            Response::Err(code) => {
                return Err(CycleError::MotionRejected {
                    command: "M999".to_string(),
                    code,
                });
            }
            other => return Err(unexpected("M999", &other)),
        }
        self.station.estop_latch().clear();
        self.needs_homing = true;
        self.fire(CycleEvent::ClearEstop)?;
        self.next_step = 0;
        self.status.update(|s| {
            s.current_step = None;
            s.holes_completed = 0;
            s.error_code = None;
            s.error_message = None;
            s.message = None;
        });
        Ok(())
    }

    /// Enter ESTOP if the latch or the input is active, whatever the state.
    pub fn poll_safety(&mut self) -> CycleState {
        if self.state() != CycleState::Estop
            && let Some(cause) = self.station.estop_tripped()
        {
            self.enter_estop(cause);
        }
        self.state()
    }

    // ─── Transitions ────────────────────────────────────────────────

    fn check(&self, event: CycleEvent) -> Result<CycleState, CycleError> {
        let state = self.state();
        match transition(state, event) {
            TransitionResult::Ok(next) => Ok(next),
            TransitionResult::Rejected(reason) => Err(CycleError::InvalidTransition {
                state,
                event,
                reason,
            }),
        }
    }

    fn fire(&mut self, event: CycleEvent) -> Result<CycleState, CycleError> {
        let prev = self.state();
        let next = self.check(event)?;
        self.status.update(|s| s.state = next);
        if prev != next {
            info!("{prev} -> {next} ({event:?})");
        }
        Ok(next)
    }

    /// Force a state when the table has no edge for it.
    fn force(&mut self, state: CycleState) {
        warn!("Forcing cycle state {} -> {state}", self.state());
        self.status.update(|s| s.state = state);
    }

    // ─── Run ────────────────────────────────────────────────────────

    fn home_if_needed(&mut self) -> Result<(), CycleError> {
        if !self.needs_homing {
            match self.link.request("M114")? {
                Response::Status(line) if parse_homed(&line) == Some((true, true)) => {
                    debug!("Table already homed");
                    return Ok(());
                }
                Response::Err(ErrorCode::Estop) => return Err(self.motion_estop()),
                other => debug!("Homing required: {other}"),
            }
        }

        info!("Homing table");
        match self.link.request("G28")? {
            Response::Ok(_) => {
                self.needs_homing = false;
                Ok(())
            }
            Response::Err(ErrorCode::Estop) => Err(self.motion_estop()),
            Response::Err(code) if code.is_homing_failure() => Err(CycleError::Homing(code)),
            Response::Err(code) => Err(CycleError::MotionRejected {
                command: "G28".to_string(),
                code,
            }),
            other => Err(unexpected("G28", &other)),
        }
    }

    fn run_steps(&mut self) -> Result<(), CycleError> {
        let Some(steps) = self.program.as_ref().map(|p| p.steps.clone()) else {
            return Err(CycleError::InvalidTransition {
                state: self.state(),
                event: CycleEvent::BeginFreeMove,
                reason: "no device loaded",
            });
        };

        while let Some(step) = steps.get(self.next_step).copied() {
            let index = self.next_step;
            self.check_safety()?;
            self.status.update(|s| s.current_step = Some(index));
            if step.is_work() {
                self.fire(CycleEvent::BeginWorkMove)?;
                self.move_to(&step)?;
                self.screw_hole(index)?;
            } else {
                self.fire(CycleEvent::BeginFreeMove)?;
                self.move_to(&step)?;
            }
            self.next_step += 1;
        }

        if self.park_on_complete {
            self.check_safety()?;
            self.park()?;
        }
        self.check_safety()?;
        self.fire(CycleEvent::ProgramDone)?;
        let count = self.status.update(|s| {
            s.current_step = None;
            s.cycle_count += 1;
            s.cycle_count
        });
        info!("Program complete (cycle #{count})");
        Ok(())
    }

    fn screw_hole(&mut self, index: usize) -> Result<(), CycleError> {
        self.fire(CycleEvent::FeedScrew)?;
        self.station.feed_screw()?;
        self.fire(CycleEvent::ScrewPresent)?;
        self.station.lower()?;
        self.fire(CycleEvent::CylinderDown)?;
        self.station.drive()?;
        self.fire(CycleEvent::TorqueReached)?;
        self.station.raise()?;
        self.station.free_run()?;
        let done = self.status.update(|s| {
            s.holes_completed += 1;
            s.holes_completed
        });
        info!("Hole at step {index} done ({done} complete)");
        Ok(())
    }

    fn move_to(&mut self, step: &ProgramStep) -> Result<(), CycleError> {
        let command = step.move_command();
        let response = self.link.request(&command)?;
        match response {
            Response::Ok(Some(t)) if is_endstop_token(&t) => Err(CycleError::EndstopAbort(t)),
            Response::Ok(_) => Ok(()),
            Response::Err(ErrorCode::Estop) => Err(self.motion_estop()),
            Response::Err(code) => Err(CycleError::MotionRejected { command, code }),
            other => Err(unexpected(&command, &other)),
        }
    }

    /// Park at the zero position. An endstop stop on the way home is
    /// expected and accepted.
    fn park(&mut self) -> Result<(), CycleError> {
        match self.link.request("ZERO")? {
            Response::Ok(Some(t)) if is_endstop_token(&t) => {
                debug!("Park stopped on {t}");
                Ok(())
            }
            Response::Ok(_) => Ok(()),
            Response::Err(ErrorCode::Estop) => Err(self.motion_estop()),
            Response::Err(code) => Err(CycleError::MotionRejected {
                command: "ZERO".to_string(),
                code,
            }),
            other => Err(unexpected("ZERO", &other)),
        }
    }

    fn check_safety(&self) -> Result<(), CycleError> {
        match self.station.estop_tripped() {
            Some(cause) => Err(CycleError::Safety(cause)),
            None => Ok(()),
        }
    }

    /// Motion node answered `err ESTOP`.
    fn motion_estop(&self) -> CycleError {
        let latch = self.station.estop_latch();
        latch.trigger(EstopCause::Command);
        CycleError::Safety(latch.cause().unwrap_or(EstopCause::Command))
    }

    // ─── Fault handling ─────────────────────────────────────────────

    fn settle(&mut self, result: Result<(), CycleError>) -> CycleState {
        if let Err(err) = result {
            if let Some(cause) = self.station.estop_tripped() {
                self.enter_estop(cause);
            } else if let CycleError::Safety(cause) = err {
                self.enter_estop(cause);
            } else if err.is_torque_miss() {
                self.enter_pause(err);
            } else {
                self.enter_error(err);
            }
        }
        self.state()
    }

    fn enter_estop(&mut self, cause: EstopCause) {
        error!("Cycle E-STOP ({cause}) in {}", self.state());
        self.station.estop_latch().trigger(cause);
        self.station.safe_state();
        if let Err(e) = self.link.emergency_stop(cause) {
            error!("Failed to stop motion node: {e}");
        }
        self.needs_homing = true;
        if self.fire(CycleEvent::Estop).is_err() {
            self.force(CycleState::Estop);
        }
        let code = CycleError::Safety(cause);
        self.status.update(|s| {
            s.error_code = Some(code.code().to_string());
            s.error_message = Some(code.to_string());
            s.message = Some(ESTOP_HINT.to_string());
        });
    }

    fn enter_pause(&mut self, err: CycleError) {
        warn!("Pausing: {err}");
        if let Err(e) = self.station.release() {
            self.enter_error(e);
            return;
        }
        if self.fire(CycleEvent::TorqueMissed).is_err() {
            self.force(CycleState::Paused);
        }
        self.status.update(|s| s.message = Some(err.code().to_string()));
    }

    fn enter_error(&mut self, err: CycleError) {
        error!("Cycle fault [{}]: {err}", err.code());
        self.station.safe_state();
        match self.link.request("M18") {
            Ok(Response::Ok(_)) => {}
            Ok(other) => warn!("Unexpected answer to M18: {other}"),
            Err(e) => error!("Failed to disable drivers: {e}"),
        }
        self.needs_homing = true;
        if self.fire(CycleEvent::Fault).is_err() {
            self.force(CycleState::Error);
        }
        self.status.update(|s| {
            s.error_code = Some(err.code().to_string());
            s.error_message = Some(err.to_string());
            s.message = None;
        });
    }
}

fn unexpected(command: &str, response: &Response) -> CycleError {
    CycleError::Link(LinkError::Unexpected {
        command: command.to_string(),
        response: response.to_string(),
    })
}
