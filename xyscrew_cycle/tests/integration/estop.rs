//! Emergency stop during a cycle and its recovery.

use std::time::Duration;

use xyscrew_common::safety::EstopCause;
use xyscrew_cycle::{CycleError, CycleState};

use super::common::loaded;

#[test]
fn estop_while_screwing_stops_everything() {
    let mut rig = loaded();
    // Cylinder is down after 150 ms; torque would come at 550 ms.
    rig.sim.estop_after_torque_on(Duration::from_millis(300));

    assert_eq!(rig.machine.start().unwrap(), CycleState::Estop);
    let status = rig.machine.status();
    assert_eq!(status.error_code.as_deref(), Some("ESTOP"));
    assert!(status.message.is_some());
    assert_eq!(status.holes_completed, 0);
    assert_eq!(status.current_step, Some(1));

    assert!(!rig.sim.relay("cylinder"));
    assert!(!rig.sim.relay("torque_mode"));
    assert!(rig.machine.estop_latch().is_active());
    let m114 = rig.motion("M114");
    assert!(m114.contains("HX:0 HY:0"), "{m114}");
    assert!(m114.ends_with("ESTOP:1"), "{m114}");
    assert_eq!(rig.motion("G X10"), "err ESTOP");
}

#[test]
fn estop_accepts_only_clear() {
    let mut rig = loaded();
    rig.sim.estop_after_torque_on(Duration::from_millis(300));
    rig.machine.start().unwrap();

    assert!(rig.machine.reset().is_err());
    assert!(rig.machine.start().is_err());
    assert!(rig.machine.resume().is_err());
    assert!(rig.machine.load_device("pcb-a").is_err());
    assert_eq!(rig.machine.state(), CycleState::Estop);
}

#[test]
fn clear_needs_released_input_then_rehomes() {
    let mut rig = loaded();
    rig.sim.estop_after_torque_on(Duration::from_millis(300));
    rig.machine.start().unwrap();

    assert_eq!(rig.machine.clear_estop(), Err(CycleError::EstopStillActive));
    assert_eq!(rig.machine.state(), CycleState::Estop);

    rig.sim.set_estop(false);
    rig.machine.clear_estop().unwrap();
    let status = rig.machine.status();
    assert_eq!(status.state, CycleState::Ready);
    assert_eq!(status.error_code, None);
    assert!(!rig.machine.estop_latch().is_active());
    assert!(rig.motion("M114").ends_with("ESTOP:0"));

    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
    assert_eq!(rig.motion("M114"), "X:0.000 Y:0.000 HX:1 HY:1 EN:1 ESTOP:0");
}

#[test]
fn latched_operator_stop_blocks_start() {
    let mut rig = loaded();
    rig.machine.estop_latch().trigger(EstopCause::Operator);

    assert_eq!(rig.machine.start().unwrap(), CycleState::Estop);
    assert_eq!(rig.sim.pulses("feeder"), 0);

    rig.machine.clear_estop().unwrap();
    assert_eq!(rig.machine.state(), CycleState::Ready);
}
