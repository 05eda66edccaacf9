//! Clock capability.
//!
//! All pulse timing and every timeout in the workspace goes through
//! [`Clock`]. Production code uses [`MonotonicClock`]; tests substitute
//! [`SimClock`], whose time only advances when something sleeps on it, so a
//! twenty-second homing timeout runs in microseconds of real time.
//!
//! Times are expressed as a `Duration` since the clock's own origin.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time plus the ability to wait on it.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock origin.
    fn now(&self) -> Duration;

    /// Block for `duration`.
    fn sleep(&self, duration: Duration);

    /// Block until `deadline` (no-op if already past).
    fn sleep_until(&self, deadline: Duration) {
        let now = self.now();
        if deadline > now {
            self.sleep(deadline - now);
        }
    }
}

/// Clock handle shared between the motion thread and its callers.
pub type SharedClock = Arc<dyn Clock>;

// ─── Monotonic Clock ────────────────────────────────────────────────

/// Below this remaining time the clock spins instead of yielding to the OS.
const SPIN_THRESHOLD: Duration = Duration::from_micros(200);

/// Wall-clock monotonic time backed by `Instant`.
///
/// Short waits are busy-spun so step pulse edges stay within the
/// configured pulse-width tolerance; long waits sleep first and spin the
/// tail.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Convenience constructor returning a shared handle.
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        if duration > SPIN_THRESHOLD {
            std::thread::sleep(duration - SPIN_THRESHOLD);
        }
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

// ─── Simulated Clock ────────────────────────────────────────────────

/// Simulated clock: time advances only through `sleep` or `advance`.
///
/// Clones share the same timeline, so a motion thread and a test thread
/// observe one consistent virtual time.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    nanos: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to a clone of this clock.
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }

    /// Move virtual time forward.
    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration_to_nanos(duration), Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
