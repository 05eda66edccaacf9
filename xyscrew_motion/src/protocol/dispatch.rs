//! Command dispatcher.
//!
//! Exhaustive match over [`Command`]: every variant produces exactly one
//! [`Response`]. While the E-STOP latch is set only the commands in
//! [`Command::allowed_during_estop`] are served.

use tracing::{debug, warn};
use xyscrew_common::protocol::{ErrorCode, Response, token};
use xyscrew_common::safety::EstopCause;

use crate::axis::{AxisController, AxisError, AxisId, MoveOutcome};
use crate::engine::{FeedPreset, HomeTarget, MotionEngine, MotionError, format_endstops};
use crate::pins::EndstopState;
use crate::scheduler::DualOutcome;

use super::Reply;
use super::command::{Command, SetCommand};

/// Execute one parsed command against the engine.
pub fn dispatch(engine: &mut MotionEngine, command: Command) -> Reply {
    engine.sync_safety();
    if engine.is_estopped() && !command.allowed_during_estop() {
        debug!("Rejected {:?}: E-STOP active", command);
        return Reply::respond(Response::Err(ErrorCode::Estop));
    }

    let result = match command {
        Command::Ping => Ok(Response::Pong),
        Command::Status => Ok(Response::Status(engine.status().to_string())),
        Command::Endstops => Ok(Response::Status(format_endstops(engine.endstops()))),
        Command::EmergencyStop => {
            engine.emergency_stop(EstopCause::Command);
            Ok(Response::ok_with(token::ESTOP))
        }
        Command::ClearEstop => {
            engine.clear_estop();
            Ok(Response::ok())
        }
        Command::EnableDrivers => {
            engine.set_drivers(true);
            Ok(Response::ok())
        }
        Command::DisableDrivers => {
            engine.set_drivers(false);
            Ok(Response::ok())
        }
        Command::Home(target) => engine
            .home(target)
            .map(|()| Response::ok_with(token::IN_HOME_POS)),
        Command::Calibrate => calibrate(engine),
        Command::Zero => engine
            .move_xy(Some(0.0), Some(0.0), None, FeedPreset::Default, true)
            .map(|outcome| dual_response(&outcome, Some(token::IN_ZERO_POS))),
        Command::Move {
            x,
            y,
            feed,
            preset,
            mode,
        } => engine
            .move_xy(x, y, feed, preset, mode.is_guarded())
            .map(|outcome| dual_response(&outcome, None)),
        Command::Jog {
            axis,
            delta,
            feed,
            preset,
            mode,
        } => engine
            .jog(axis, delta, feed, preset, mode.is_guarded())
            .map(|outcome| jog_response(axis, outcome)),
        Command::Work { target, feed } => {
            let moved = match target {
                Some((x, y)) => engine.move_xy(Some(x), Some(y), feed, FeedPreset::Default, true),
                None => engine.move_to_work(feed),
            };
            moved.map(|outcome| dual_response(&outcome, Some(token::IN_WORK_POS)))
        }
        Command::Set(set) => apply_set(engine, set).map(|()| Response::ok()),
        Command::Quit => {
            return Reply {
                response: Response::ok_with(token::BYE),
                close: true,
            };
        }
    };

    match result {
        Ok(response) => Reply::respond(response),
        Err(err) => {
            let code = err.code();
            match code {
                ErrorCode::BadArgs | ErrorCode::BadSet | ErrorCode::NotHomed => {
                    debug!("{:?} rejected: {err}", command)
                }
                _ => warn!("{:?} failed: {err}", command),
            }
            Reply::respond(Response::Err(code))
        }
    }
}

/// Home both axes, then settle at (0, 0) with a guarded move.
fn calibrate(engine: &mut MotionEngine) -> Result<Response, MotionError> {
    engine.home(HomeTarget::All)?;
    let outcome = engine.move_xy(Some(0.0), Some(0.0), None, FeedPreset::Default, true)?;
    Ok(dual_response(&outcome, Some(token::CALIBRATED)))
}

/// `ok ENDSTOP_*` when a guarded axis stopped early, otherwise `ok [token]`.
fn dual_response(outcome: &DualOutcome, success: Option<&str>) -> Response {
    let hits = outcome.endstops();
    if hits == EndstopState::all() {
        Response::ok_with(token::ENDSTOP_XY)
    } else if hits.contains(EndstopState::X_MIN) {
        Response::ok_with(token::ENDSTOP_X)
    } else if hits.contains(EndstopState::Y_MIN) {
        Response::ok_with(token::ENDSTOP_Y)
    } else {
        success.map_or_else(Response::ok, Response::ok_with)
    }
}

fn jog_response(axis: AxisId, outcome: MoveOutcome) -> Response {
    match (outcome, axis) {
        (MoveOutcome::EndstopHit, AxisId::X) => Response::ok_with(token::ENDSTOP_X),
        (MoveOutcome::EndstopHit, AxisId::Y) => Response::ok_with(token::ENDSTOP_Y),
        (MoveOutcome::Completed(_), _) => Response::ok(),
    }
}

fn apply_set(engine: &mut MotionEngine, set: SetCommand) -> Result<(), MotionError> {
    match set {
        SetCommand::Work { x, y, feed } => engine.set_work(x, y, feed),
        SetCommand::Limit { x, y } => {
            // Both values are checked before either axis changes.
            for (id, value) in [(AxisId::X, x), (AxisId::Y, y)] {
                if let Some(value) = value {
                    engine.axis(id).check_limit(value)?;
                }
            }
            set_per_axis(engine, x, y, |axis, v| axis.set_limit(v))
        }
        SetCommand::StepsPerRev { x, y } => {
            set_per_axis(engine, x, y, |axis, v| axis.set_steps_per_rev(v))
        }
        SetCommand::StepsPerMm { x, y } => {
            set_per_axis(engine, x, y, |axis, v| axis.set_steps_per_mm(v))
        }
        SetCommand::Zero(HomeTarget::All) => {
            engine.axis_mut(AxisId::X).set_zero();
            engine.axis_mut(AxisId::Y).set_zero();
            Ok(())
        }
        SetCommand::Zero(HomeTarget::Axis(id)) => {
            engine.axis_mut(id).set_zero();
            Ok(())
        }
    }
}

fn set_per_axis(
    engine: &mut MotionEngine,
    x: Option<f64>,
    y: Option<f64>,
    setter: impl Fn(&mut AxisController, f64) -> Result<(), AxisError>,
) -> Result<(), MotionError> {
    for (id, value) in [(AxisId::X, x), (AxisId::Y, y)] {
        if let Some(value) = value {
            setter(engine.axis_mut(id), value)?;
        }
    }
    Ok(())
}
