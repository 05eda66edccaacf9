//! Station faults end in ERROR with drivers off and homing invalidated.

use xyscrew_cycle::{CycleError, CycleState};

use super::common::{loaded, rig};

fn assert_fault(rig: &super::common::Rig, code: &str) {
    let status = rig.machine.status();
    assert_eq!(status.state, CycleState::Error);
    assert_eq!(status.error_code.as_deref(), Some(code));
    assert!(status.error_message.is_some());
    assert!(!rig.sim.relay("cylinder"));
    assert!(!rig.sim.relay("torque_mode"));
    assert!(rig.motion("M114").contains("HX:0 HY:0 EN:0"));
}

#[test]
fn screw_not_detected_after_retries() {
    let mut rig = loaded();
    rig.sim.empty_feeds(3);

    assert_eq!(rig.machine.start().unwrap(), CycleState::Error);
    assert_fault(&rig, "SCREW_NOT_DETECTED");
    assert_eq!(rig.sim.pulses("feeder"), 3);
    assert_eq!(rig.machine.status().current_step, Some(1));
}

#[test]
fn feeder_recovers_within_attempts() {
    let mut rig = loaded();
    rig.sim.empty_feeds(2);
    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
    assert_eq!(rig.sim.pulses("feeder"), 5);
}

#[test]
fn cylinder_down_watchdog() {
    let mut rig = loaded();
    rig.sim.jam_cylinder(true);
    assert_eq!(rig.machine.start().unwrap(), CycleState::Error);
    assert_fault(&rig, "CYLINDER_DOWN_TIMEOUT");
}

#[test]
fn cylinder_up_watchdog() {
    let mut rig = loaded();
    rig.sim.kill_up_sensor(true);
    assert_eq!(rig.machine.start().unwrap(), CycleState::Error);
    assert_fault(&rig, "CYLINDER_UP_TIMEOUT");
}

#[test]
fn down_sensor_still_active_after_raise() {
    let mut rig = loaded();
    rig.sim.stick_down_sensor(true);
    assert_eq!(rig.machine.start().unwrap(), CycleState::Error);
    assert_fault(&rig, "UNEXPECTED_SENSOR");
}

#[test]
fn reset_after_fault_rehomes_and_runs() {
    let mut rig = loaded();
    rig.sim.jam_cylinder(true);
    rig.machine.start().unwrap();

    rig.sim.jam_cylinder(false);
    rig.machine.reset().unwrap();
    let status = rig.machine.status();
    assert_eq!(status.state, CycleState::Ready);
    assert_eq!(status.error_code, None);

    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
    assert_eq!(rig.motion("M114"), "X:0.000 Y:0.000 HX:1 HY:1 EN:1 ESTOP:0");
}

#[test]
fn unknown_device_leaves_state_alone() {
    let mut rig = rig();
    assert_eq!(
        rig.machine.load_device("pcb-z"),
        Err(CycleError::UnknownDevice("pcb-z".to_string()))
    );
    assert_eq!(rig.machine.state(), CycleState::Idle);
    assert!(rig.machine.start().is_err());
    assert_eq!(rig.machine.state(), CycleState::Idle);
}
