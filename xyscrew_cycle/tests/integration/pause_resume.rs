//! Torque miss pauses on the hole; resume retries it.

use xyscrew_cycle::{CycleError, CycleState};

use super::common::loaded;

#[test]
fn torque_miss_pauses_on_the_hole() {
    let mut rig = loaded();
    rig.sim.miss_torque(1);

    assert_eq!(rig.machine.start().unwrap(), CycleState::Paused);
    let status = rig.machine.status();
    assert_eq!(status.message.as_deref(), Some("TORQUE_NOT_REACHED"));
    assert_eq!(status.error_code, None);
    assert_eq!(status.holes_completed, 0);
    assert_eq!(status.current_step, Some(1));

    // Station released, table untouched.
    assert!(!rig.sim.relay("cylinder"));
    assert!(!rig.sim.relay("torque_mode"));
    assert_eq!(rig.sim.pulses("free_run"), 1);
    assert!(rig.motion("M114").starts_with("X:20.000 Y:30.000 HX:1 HY:1 EN:1"));
}

#[test]
fn resume_retries_the_missed_hole() {
    let mut rig = loaded();
    rig.sim.miss_torque(1);
    rig.machine.start().unwrap();

    assert_eq!(rig.machine.resume().unwrap(), CycleState::Completed);
    let status = rig.machine.status();
    assert_eq!(status.holes_completed, 3);
    assert_eq!(status.message, None);
    assert_eq!(status.cycle_count, 1);
    // The missed hole gets a fresh screw.
    assert_eq!(rig.sim.pulses("feeder"), 4);
}

#[test]
fn paused_cycle_only_resumes_or_resets() {
    let mut rig = loaded();
    rig.sim.miss_torque(1);
    rig.machine.start().unwrap();

    assert!(matches!(
        rig.machine.start(),
        Err(CycleError::InvalidTransition { state: CycleState::Paused, .. })
    ));
    assert!(rig.machine.load_device("pcb-a").is_err());
    assert_eq!(rig.machine.state(), CycleState::Paused);

    rig.machine.reset().unwrap();
    assert_eq!(rig.machine.state(), CycleState::Ready);
    assert_eq!(rig.machine.status().message, None);
    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
}

#[test]
fn resume_outside_pause_is_rejected() {
    let mut rig = loaded();
    assert!(matches!(
        rig.machine.resume(),
        Err(CycleError::InvalidTransition { state: CycleState::Ready, .. })
    ));
    assert_eq!(rig.machine.state(), CycleState::Ready);
}
