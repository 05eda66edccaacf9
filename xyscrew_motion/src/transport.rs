//! Line transport.
//!
//! Frames newline-terminated requests from any `BufRead` (stdin, a serial
//! port, a test buffer) onto a [`MotionClient`] and writes one response
//! line per request. Blank lines and `;` comments are skipped; read
//! timeouts (serial ports poll) are retried.
//!
//! Input is read on its own thread so a [`REALTIME_ESTOP`] byte reaches the
//! E-STOP latch while the command in flight is still executing.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use xyscrew_common::protocol::REALTIME_ESTOP;
use xyscrew_common::safety::{EstopCause, EstopLatch};

use crate::server::MotionClient;

/// Serial read timeout; bounds how long shutdown waits on an idle port.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer sent `QUIT`/`EXIT`.
    Quit,
    /// Input reached end of file.
    Eof,
    /// `running` flag was cleared.
    Stopped,
}

/// Strip framing: surrounding whitespace, CR, and `;` comments.
pub fn frame(raw: &str) -> Option<&str> {
    let line = raw.split(';').next().unwrap_or("").trim();
    (!line.is_empty()).then_some(line)
}

/// Serve requests from `reader` until quit, EOF or `running` clears.
///
/// `reader` moves to a detached input thread. After `QUIT` that thread
/// exits on its next read; on stdin that may be process exit.
pub fn serve_session<R, W>(
    client: &MotionClient,
    reader: R,
    mut writer: W,
    running: Option<&AtomicBool>,
) -> io::Result<SessionEnd>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let (tx, rx) = mpsc::channel();
    let estop = client.estop().clone();
    thread::Builder::new()
        .name("xyscrew-input".to_string())
        .spawn(move || read_lines(reader, &estop, &tx))?;

    loop {
        if running.is_some_and(|flag| !flag.load(Ordering::SeqCst)) {
            return Ok(SessionEnd::Stopped);
        }

        let raw = match rx.recv_timeout(SERIAL_READ_TIMEOUT) {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(e),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(SessionEnd::Eof),
        };
        let Some(line) = frame(&raw) else {
            continue;
        };
        let reply = client
            .request(line)
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;

        writeln!(writer, "{}", reply.response)?;
        writer.flush()?;
        if reply.close {
            info!("Session closed by peer");
            return Ok(SessionEnd::Quit);
        }
    }
}

/// Split input into lines, acting on [`REALTIME_ESTOP`] bytes as soon as
/// they are read. Returns when the input ends or the session is gone.
fn read_lines<R: BufRead>(mut reader: R, estop: &EstopLatch, tx: &Sender<io::Result<String>>) {
    let mut pending = Vec::new();
    loop {
        let chunk = match reader.fill_buf() {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };

        let len = chunk.len();
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                REALTIME_ESTOP => {
                    warn!("Realtime E-STOP received");
                    estop.trigger(EstopCause::Command);
                }
                b'\n' => {
                    lines.push(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
                _ => pending.push(byte),
            }
        }
        reader.consume(len);

        for line in lines {
            if tx.send(Ok(line)).is_err() {
                debug!("Session gone; input thread exiting");
                return;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(Ok(String::from_utf8_lossy(&pending).into_owned()));
    }
}

type Port = Box<dyn serialport::SerialPort>;

/// Open a serial port as a (reader, writer) pair.
pub fn open_serial(path: &str, baud: u32) -> Result<(io::BufReader<Port>, Port), serialport::Error> {
    let port = serialport::new(path, baud)
        .timeout(SERIAL_READ_TIMEOUT)
        .open()?;
    let writer = port.try_clone()?;
    debug!("Opened serial port {path} at {baud} baud");
    Ok((io::BufReader::new(port), writer))
}
