//! Motion thread.
//!
//! The [`MotionEngine`] lives on one dedicated thread. Every request line
//! travels over a channel and is executed to completion before the next is
//! read, so commands from several clients (serial session, cycle node,
//! tests) are serialized without locks around the engine.
//!
//! E-STOP does not wait in that queue: [`MotionClient::emergency_stop`]
//! sets the shared latch directly, which the pulse loop polls before every
//! pulse.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, info};
use xyscrew_common::protocol::Response;
use xyscrew_common::safety::{EstopCause, EstopLatch};

use crate::engine::MotionEngine;
use crate::protocol::{Reply, handle_line};
use crate::rt::{MOTION_STACK_SIZE, RtError, RtOptions, rt_setup};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("motion thread is not running")]
    Disconnected,
    #[error("failed to spawn motion thread: {0}")]
    Spawn(String),
    #[error(transparent)]
    Rt(#[from] RtError),
}

enum Message {
    Line { line: String, reply: Sender<Reply> },
    Shutdown,
}

/// Cloneable handle for submitting lines to the motion thread.
#[derive(Clone)]
pub struct MotionClient {
    tx: Sender<Message>,
    estop: EstopLatch,
}

impl MotionClient {
    /// Submit one line and wait for its reply.
    pub fn request(&self, line: &str) -> Result<Reply, ServerError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Message::Line {
                line: line.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| ServerError::Disconnected)?;
        reply_rx.recv().map_err(|_| ServerError::Disconnected)
    }

    /// Submit one line and return only the response.
    pub fn send(&self, line: &str) -> Result<Response, ServerError> {
        self.request(line).map(|reply| reply.response)
    }

    #[inline]
    pub fn estop(&self) -> &EstopLatch {
        &self.estop
    }

    /// Assert E-STOP without queueing behind the command in flight.
    ///
    /// Returns once the motion thread has applied the stop (drivers off,
    /// homing invalidated).
    pub fn emergency_stop(&self, cause: EstopCause) -> Result<(), ServerError> {
        self.estop.trigger(cause);
        self.request("M114").map(|_| ())
    }
}

impl std::fmt::Debug for MotionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionClient")
            .field("estop", &self.estop.snapshot())
            .finish()
    }
}

/// Owner of the motion thread.
pub struct MotionServer {
    handle: Option<JoinHandle<()>>,
    client: MotionClient,
}

impl MotionServer {
    /// Move `engine` onto a new motion thread and apply `rt` there.
    pub fn spawn(engine: MotionEngine, rt: RtOptions) -> Result<Self, ServerError> {
        let estop = engine.estop().clone();
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("xyscrew-motion".to_string())
            .stack_size(MOTION_STACK_SIZE * 2)
            .spawn(move || {
                let setup = rt_setup(rt);
                let ready = setup.is_ok();
                let _ = ready_tx.send(setup);
                if ready {
                    serve(engine, rx);
                }
            })
            .map_err(|e| ServerError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!("{err}");
                let _ = handle.join();
                return Err(err.into());
            }
            Err(_) => return Err(ServerError::Disconnected),
        }

        info!("Motion thread started");
        Ok(Self {
            handle: Some(handle),
            client: MotionClient { tx, estop },
        })
    }

    pub fn client(&self) -> MotionClient {
        self.client.clone()
    }

    /// Stop the motion thread after the command in flight and join it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.client.tx.send(Message::Shutdown);
            if handle.join().is_err() {
                error!("Motion thread panicked");
            }
        }
    }
}

impl Drop for MotionServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(mut engine: MotionEngine, rx: Receiver<Message>) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Line { line, reply } => {
                let result = handle_line(&mut engine, &line);
                debug!("'{}' -> '{}'", line.trim(), result.response);
                if reply.send(result).is_err() {
                    debug!("Requester went away before the reply");
                }
            }
            Message::Shutdown => break,
        }
    }
    engine.set_drivers(false);
    info!("Motion thread stopped");
}
