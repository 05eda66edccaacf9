//! Line command protocol.
//!
//! One request line in, one response line out. Parsing lives in
//! [`command`], execution in [`dispatch`]; [`handle_line`] joins them.
//!
//! | Verb | Effect | Success |
//! |------|--------|---------|
//! | `PING` | liveness | `PONG` |
//! | `M114` | position/status | `X:.. Y:.. HX:.. HY:.. EN:.. ESTOP:..` |
//! | `M119` | endstops | `X_MIN:.. Y_MIN:..` |
//! | `M112` / `M999` | assert / clear E-STOP | `ok ESTOP` / `ok` |
//! | `M17` / `M18` | drivers on / off | `ok` |
//! | `G28`, `HOME [X\|Y]` | home | `ok IN_HOME_POS` |
//! | `CAL` | home both, settle at 0,0 | `ok CALIBRATED` |
//! | `ZERO` | guarded move to 0,0 | `ok IN_ZERO_POS` |
//! | `G` | guarded move, default feed | `ok` |
//! | `G1` / `GF`, `G0` | fast move, default / max feed | `ok` |
//! | `DX`, `DY` / `JX`, `JY` | guarded / fast relative jog | `ok` |
//! | `WORK [X Y] [F]` | guarded move to work position | `ok IN_WORK_POS` |
//! | `SET WORK\|LIM\|STEPS\|SPMM\|X0\|Y0\|XY0` | parameters | `ok` |
//! | `QUIT`, `EXIT` | close the session | `ok BYE` |
//!
//! Guarded moves that stop on an endstop answer `ok ENDSTOP_X`,
//! `ok ENDSTOP_Y` or `ok ENDSTOP_XY`.

pub mod command;
pub mod dispatch;

use tracing::debug;
use xyscrew_common::protocol::Response;

use crate::engine::MotionEngine;

pub use command::{Command, MAX_TOKENS, MoveMode, ProtocolError, SetCommand, parse};
pub use dispatch::dispatch;

/// Response to one line, plus whether the session should end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub close: bool,
}

impl Reply {
    #[inline]
    pub fn respond(response: Response) -> Self {
        Self {
            response,
            close: false,
        }
    }
}

/// Parse and execute one request line.
pub fn handle_line(engine: &mut MotionEngine, line: &str) -> Reply {
    match command::parse(line) {
        Ok(command) => dispatch(engine, command),
        Err(err) => {
            debug!("Rejected '{}': {err}", line.trim());
            Reply::respond(Response::Err(err.code()))
        }
    }
}
