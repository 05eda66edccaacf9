//! Deadline-bounded wait primitive.
//!
//! Every blocking hardware wait in the workspace (homing approach, cylinder
//! travel, torque, screw presence) is expressed as a condition plus a
//! deadline. A wait can end in exactly three ways, so no caller can hang on
//! a stuck sensor.

use std::time::Duration;

use crate::time::Clock;

/// How a bounded wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition became true before the deadline.
    Satisfied,
    /// The deadline passed with the condition still false.
    TimedOut,
    /// The cancel predicate fired (E-STOP).
    Cancelled,
}

impl WaitOutcome {
    #[inline]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Absolute deadline on a [`Clock`] timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Duration);

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(clock: &dyn Clock, timeout: Duration) -> Self {
        Self(clock.now().saturating_add(timeout))
    }

    #[inline]
    pub const fn at(&self) -> Duration {
        self.0
    }

    #[inline]
    pub fn expired(&self, clock: &dyn Clock) -> bool {
        clock.now() >= self.0
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        self.0.saturating_sub(clock.now())
    }
}

/// Poll `condition` every `poll` until it holds, `cancel` fires or
/// `timeout` elapses.
///
/// `cancel` is checked before `condition` on every poll, so an E-STOP wins
/// over a sensor that happens to become active in the same instant. The
/// condition is evaluated one final time at the deadline.
pub fn wait_until<C, X>(
    clock: &dyn Clock,
    timeout: Duration,
    poll: Duration,
    mut condition: C,
    mut cancel: X,
) -> WaitOutcome
where
    C: FnMut() -> bool,
    X: FnMut() -> bool,
{
    let deadline = Deadline::after(clock, timeout);
    let poll = poll.max(Duration::from_micros(1));
    loop {
        if cancel() {
            return WaitOutcome::Cancelled;
        }
        if condition() {
            return WaitOutcome::Satisfied;
        }
        if deadline.expired(clock) {
            return WaitOutcome::TimedOut;
        }
        clock.sleep(poll.min(deadline.remaining(clock)));
    }
}
