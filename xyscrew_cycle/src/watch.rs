//! E-STOP input watcher.
//!
//! The cycle thread blocks inside motion requests, so the station's E-STOP
//! input is also sampled on a thread of its own. A pressed (or unreadable)
//! input latches `Signal`. Every activation of the latch, whatever its
//! cause, is forwarded once through the link's [`EstopSignal`] so a move in
//! flight on the motion node stops at once.
//!
//! The watcher sleeps in wall-clock time and never touches the cycle's
//! [`Clock`](xyscrew_common::time::Clock).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};
use xyscrew_common::io::SensorInterface;
use xyscrew_common::safety::{EstopCause, EstopLatch};

use crate::link::EstopSignal;

/// Owner of the watcher thread; stops and joins it on drop.
pub struct EstopWatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EstopWatcher {
    pub fn spawn(
        input: Box<dyn SensorInterface>,
        sensor: String,
        latch: EstopLatch,
        signal: Box<dyn EstopSignal>,
        poll: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("xyscrew-estop".to_string())
            .spawn(move || {
                let mut watch = Watch {
                    input,
                    sensor,
                    latch,
                    signal,
                    forwarded: false,
                };
                debug!("E-STOP watcher started ({poll:?} poll)");
                while flag.load(Ordering::SeqCst) {
                    watch.sample();
                    thread::sleep(poll);
                }
            })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("E-STOP watcher panicked");
        }
    }
}

impl Drop for EstopWatcher {
    fn drop(&mut self) {
        self.join();
    }
}

struct Watch {
    input: Box<dyn SensorInterface>,
    sensor: String,
    latch: EstopLatch,
    signal: Box<dyn EstopSignal>,
    /// Current activation already sent to the motion node.
    forwarded: bool,
}

impl Watch {
    fn sample(&mut self) {
        if !self.latch.is_active() {
            self.forwarded = false;
            let pressed = match self.input.read(&self.sensor) {
                Ok(level) => level.is_active(),
                Err(e) => {
                    error!("E-STOP input unreadable: {e}");
                    true
                }
            };
            if !pressed {
                return;
            }
            warn!("E-STOP input '{}' pressed", self.sensor);
            self.latch.trigger(EstopCause::Signal);
        }

        if !self.forwarded {
            let cause = self.latch.cause().unwrap_or(EstopCause::Signal);
            match self.signal.assert_estop(cause) {
                Ok(()) => self.forwarded = true,
                // Retried on the next sample.
                Err(e) => error!("Failed to forward E-STOP: {e}"),
            }
        }
    }
}
