//! Emergency-stop latch.
//!
//! The latch is the single shared piece of safety state. It can be set from
//! any thread (hardware signal watcher, operator, `M112`) and is polled by
//! the pulse loop before every pulse, so an in-flight pulse train stops
//! within one pulse period. Only an explicit clear resets it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::Serialize;
use tracing::{error, info};

/// What asserted the emergency stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum EstopCause {
    /// `M112` received on the command protocol.
    Command = 1,
    /// External emergency-stop input became active.
    Signal = 2,
    /// Operator action outside the protocol (Ctrl-C, UI button).
    Operator = 3,
}

impl EstopCause {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Command),
            2 => Some(Self::Signal),
            3 => Some(Self::Operator),
            _ => None,
        }
    }
}

impl fmt::Display for EstopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Command => "command",
            Self::Signal => "signal",
            Self::Operator => "operator",
        };
        f.write_str(s)
    }
}

/// Snapshot of the latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetyState {
    pub estop_active: bool,
    pub cause: Option<EstopCause>,
}

/// Cloneable handle to one shared emergency-stop latch.
#[derive(Debug, Clone, Default)]
pub struct EstopLatch {
    inner: Arc<LatchInner>,
}

#[derive(Debug, Default)]
struct LatchInner {
    active: AtomicBool,
    cause: AtomicU8,
}

impl EstopLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assert the emergency stop. The first cause wins until cleared.
    pub fn trigger(&self, cause: EstopCause) {
        if !self.inner.active.swap(true, Ordering::SeqCst) {
            self.inner.cause.store(cause as u8, Ordering::SeqCst);
            error!("E-STOP asserted ({cause})");
        }
    }

    /// Release the latch. Returns whether it was active.
    pub fn clear(&self) -> bool {
        let was_active = self.inner.active.swap(false, Ordering::SeqCst);
        self.inner.cause.store(0, Ordering::SeqCst);
        if was_active {
            info!("E-STOP cleared");
        }
        was_active
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn cause(&self) -> Option<EstopCause> {
        if self.is_active() {
            EstopCause::from_u8(self.inner.cause.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> SafetyState {
        SafetyState {
            estop_active: self.is_active(),
            cause: self.cause(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_starts_clear() {
        let latch = EstopLatch::new();
        assert!(!latch.is_active());
        assert_eq!(latch.cause(), None);
    }

    #[test]
    fn first_cause_wins() {
        let latch = EstopLatch::new();
        latch.trigger(EstopCause::Signal);
        latch.trigger(EstopCause::Command);
        assert_eq!(
            latch.snapshot(),
            SafetyState {
                estop_active: true,
                cause: Some(EstopCause::Signal)
            }
        );
    }

    #[test]
    fn clones_share_state() {
        let latch = EstopLatch::new();
        let other = latch.clone();
        other.trigger(EstopCause::Operator);
        assert!(latch.is_active());
        assert!(latch.clear());
        assert!(!other.is_active());
        assert!(!other.clear());
    }

    #[test]
    fn cause_roundtrip() {
        for cause in [EstopCause::Command, EstopCause::Signal, EstopCause::Operator] {
            assert_eq!(EstopCause::from_u8(cause as u8), Some(cause));
        }
        assert_eq!(EstopCause::from_u8(0), None);
    }
}
