//! Complete programs on a healthy station.

use xyscrew_cycle::CycleState;

use super::common::{DEVICE, Rig, cycle_config, loaded, rig_with};

#[test]
fn runs_device_program_to_completion() {
    let mut rig = loaded();
    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);

    let status = rig.machine.status();
    assert_eq!(status.state, CycleState::Completed);
    assert_eq!(status.current_device.as_deref(), Some(DEVICE));
    assert_eq!(status.holes_completed, 3);
    assert_eq!(status.total_holes, 3);
    assert_eq!(status.current_step, None);
    assert_eq!(status.cycle_count, 1);
    assert_eq!(status.error_code, None);

    assert_eq!(rig.sim.pulses("feeder"), 3);
    assert_eq!(rig.sim.pulses("free_run"), 3);
    // Parked at zero, still homed.
    assert_eq!(rig.motion("M114"), "X:0.000 Y:0.000 HX:1 HY:1 EN:1 ESTOP:0");
}

#[test]
fn hole_drives_relays_in_order() {
    let mut rig = loaded();
    rig.machine.start().unwrap();

    let on = |name: &str| (name.to_string(), true);
    let off = |name: &str| (name.to_string(), false);
    assert_eq!(
        rig.sim.history()[..8],
        [
            on("feeder"),
            off("feeder"),
            on("torque_mode"),
            on("cylinder"),
            off("torque_mode"),
            off("cylinder"),
            on("free_run"),
            off("free_run"),
        ]
    );
}

#[test]
fn back_to_back_cycles_count_up() {
    let mut rig = loaded();
    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
    rig.machine.reset().unwrap();
    assert_eq!(rig.machine.state(), CycleState::Ready);
    assert_eq!(rig.machine.status().holes_completed, 0);

    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
    let status = rig.machine.status();
    assert_eq!(status.cycle_count, 2);
    assert_eq!(status.holes_completed, 3);
    assert_eq!(rig.sim.pulses("feeder"), 6);
}

#[test]
fn without_park_table_stays_on_last_step() {
    let mut config = cycle_config();
    config.park_on_complete = false;
    let mut rig = rig_with(config);
    rig.machine.load_device(DEVICE).unwrap();

    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
    assert!(rig.motion("M114").starts_with("X:120.000 Y:90.000 HX:1 HY:1"));
}

#[test]
fn status_handle_follows_the_machine() {
    let mut rig = loaded();
    let handle = rig.machine.status_handle();
    assert_eq!(handle.state(), CycleState::Ready);

    rig.machine.start().unwrap();
    assert_eq!(handle.snapshot(), rig.machine.status());
    let json = handle.snapshot().to_json();
    assert!(json.contains("\"state\":\"COMPLETED\""));
    assert!(json.contains("\"holes_completed\":3"));
}

#[test]
fn shutdown_after_run() {
    let mut rig = loaded();
    rig.machine.start().unwrap();
    let Rig { server, .. } = rig;
    server.shutdown();
}
