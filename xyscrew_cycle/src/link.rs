//! Motion links.
//!
//! The cycle node talks to the motion node only through the line protocol.
//! [`MotionLink`] is that seam: in-process it is a [`MotionClient`]; across
//! a serial cable it is a [`StreamLink`] over any `BufRead` + `Write` pair.
//!
//! Each link also hands out an [`EstopSignal`]: a stop path that does not
//! wait behind the command in flight.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use xyscrew_common::protocol::{ErrorCode, REALTIME_ESTOP, Response, ResponseError, token};
use xyscrew_common::safety::EstopLatch;
use xyscrew_common::safety::EstopCause;
use xyscrew_common::time::SharedClock;
use xyscrew_common::wait::Deadline;
use xyscrew_motion::MotionClient;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("motion node disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Io(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    BadResponse(#[from] ResponseError),
    #[error("unexpected answer to '{command}': {response}")]
    Unexpected { command: String, response: String },
}

/// Out-of-band stop towards the motion node, usable from any thread.
pub trait EstopSignal: Send + Sync {
    fn assert_estop(&self, cause: EstopCause) -> Result<(), LinkError>;
}

/// Request/response channel to the motion node.
pub trait MotionLink: Send {
    /// Send one command line and wait for its response.
    fn request(&mut self, line: &str) -> Result<Response, LinkError>;

    /// Stop path for a watcher thread while `request` blocks.
    fn estop_signal(&self) -> Box<dyn EstopSignal>;

    /// Stop the motion node: drivers off, homing invalidated.
    fn emergency_stop(&mut self, cause: EstopCause) -> Result<(), LinkError> {
        debug!("E-STOP requested on motion link ({cause})");
        match self.request("M112")? {
            Response::Ok(_) | Response::Err(ErrorCode::Estop) => Ok(()),
            other => {
                warn!("Unexpected answer to M112: {other}");
                Ok(())
            }
        }
    }
}

impl MotionLink for MotionClient {
    fn request(&mut self, line: &str) -> Result<Response, LinkError> {
        self.send(line).map_err(|_| LinkError::Disconnected)
    }

    fn estop_signal(&self) -> Box<dyn EstopSignal> {
        Box::new(self.estop().clone())
    }

    /// Sets the shared latch first so a move in flight stops at once.
    fn emergency_stop(&mut self, cause: EstopCause) -> Result<(), LinkError> {
        MotionClient::emergency_stop(self, cause).map_err(|_| LinkError::Disconnected)
    }
}

/// In-process: the motion thread polls this latch before every pulse.
impl EstopSignal for EstopLatch {
    fn assert_estop(&self, cause: EstopCause) -> Result<(), LinkError> {
        self.trigger(cause);
        Ok(())
    }
}

/// Writes [`REALTIME_ESTOP`] on the link's byte stream.
pub struct StreamEstop<W> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send> EstopSignal for StreamEstop<W> {
    fn assert_estop(&self, cause: EstopCause) -> Result<(), LinkError> {
        debug!("Sending realtime E-STOP ({cause})");
        let mut writer = self.writer.lock();
        writer
            .write_all(&[REALTIME_ESTOP])
            .and_then(|()| writer.flush())
            .map_err(|e| LinkError::Io(e.to_string()))
    }
}

/// Line protocol over a byte stream (serial port, socket, pipe).
pub struct StreamLink<R, W> {
    reader: R,
    writer: Arc<Mutex<W>>,
    clock: SharedClock,
    timeout: Duration,
}

impl<R: BufRead, W: Write> StreamLink<R, W> {
    /// `timeout` bounds the wait for each response; it must cover the
    /// longest move or homing run.
    pub fn new(reader: R, writer: W, clock: SharedClock, timeout: Duration) -> Self {
        Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            clock,
            timeout,
        }
    }

    fn read_response(&mut self) -> Result<Response, LinkError> {
        let deadline = Deadline::after(self.clock.as_ref(), self.timeout);
        let mut buf = String::new();
        loop {
            match self.reader.read_line(&mut buf) {
                Ok(0) if buf.is_empty() => return Err(LinkError::Disconnected),
                Ok(_) if buf.trim().is_empty() => buf.clear(),
                Ok(_) => return Ok(Response::parse(&buf)?),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(LinkError::Io(e.to_string())),
            }
            if deadline.expired(self.clock.as_ref()) {
                return Err(LinkError::Timeout(self.timeout));
            }
        }
    }
}

impl<R, W> MotionLink for StreamLink<R, W>
where
    R: BufRead + Send,
    W: Write + Send + 'static,
{
    fn request(&mut self, line: &str) -> Result<Response, LinkError> {
        {
            let mut writer = self.writer.lock();
            writeln!(writer, "{line}")
                .and_then(|()| writer.flush())
                .map_err(|e| LinkError::Io(e.to_string()))?;
        }
        let response = self.read_response()?;
        debug!("'{line}' -> '{response}'");
        Ok(response)
    }

    fn estop_signal(&self) -> Box<dyn EstopSignal> {
        Box::new(StreamEstop {
            writer: Arc::clone(&self.writer),
        })
    }
}

/// Parse `HX:` / `HY:` from an `M114` status line.
pub fn parse_homed(status: &str) -> Option<(bool, bool)> {
    let mut hx = None;
    let mut hy = None;
    for field in status.split_whitespace() {
        if let Some(v) = field.strip_prefix("HX:") {
            hx = Some(v == "1");
        } else if let Some(v) = field.strip_prefix("HY:") {
            hy = Some(v == "1");
        }
    }
    Some((hx?, hy?))
}

/// Whether an `ok` token reports a guarded-move endstop stop.
pub fn is_endstop_token(t: &str) -> bool {
    matches!(t, token::ENDSTOP_X | token::ENDSTOP_Y | token::ENDSTOP_XY)
}
