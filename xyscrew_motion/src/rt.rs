//! Real-time setup for the motion thread.
//!
//! Sequence, run on the motion thread before it serves any command:
//!
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 2. Prefault the stack.
//! 3. `sched_setaffinity`: pin to one CPU core (optional).
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`: RT priority (optional).
//!
//! Without the `rt` feature every step is a no-op, so simulation and tests
//! run unprivileged.

use thiserror::Error;
use tracing::info;

/// Stack size of the motion thread; the prefault touches half of it.
pub const MOTION_STACK_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("RT setup failed: {0}")]
pub struct RtError(pub String);

/// Real-time options for the motion thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtOptions {
    pub cpu_core: Option<usize>,
    pub priority: Option<i32>,
}

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), RtError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| RtError(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), RtError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn prefault_stack() {
    let mut buf = [0u8; MOTION_STACK_SIZE / 2];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into a local array.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(not(feature = "rt"))]
fn prefault_stack() {}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), RtError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| RtError(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| RtError(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), RtError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), RtError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: pid 0 targets the calling thread; `param` outlives the call.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RtError(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), RtError> {
    Ok(())
}

/// Apply `options` to the calling thread.
pub fn rt_setup(options: RtOptions) -> Result<(), RtError> {
    rt_mlockall()?;
    prefault_stack();
    if let Some(cpu) = options.cpu_core {
        rt_set_affinity(cpu)?;
    }
    if let Some(priority) = options.priority {
        rt_set_scheduler(priority)?;
    }
    if cfg!(feature = "rt") {
        info!(
            "Motion thread RT setup done (core {:?}, priority {:?})",
            options.cpu_core, options.priority
        );
    }
    Ok(())
}
