//! Power-on to first work move.

use super::common::sim_table;

#[test]
fn homes_then_moves_to_target() {
    let table = sim_table();

    assert_eq!(table.send("PING"), "PONG");
    assert_eq!(table.send("M114"), "X:0.000 Y:0.000 HX:0 HY:0 EN:0 ESTOP:0");
    assert_eq!(table.send("G28"), "ok IN_HOME_POS");
    assert_eq!(table.send("G X50 Y200 F12000"), "ok");
    assert_eq!(
        table.send("M114"),
        "X:50.000 Y:200.000 HX:1 HY:1 EN:1 ESTOP:0"
    );
    assert!((table.x.position_mm() - 50.0).abs() < 1e-9);
    assert!((table.y.position_mm() - 200.0).abs() < 1e-9);
}

#[test]
fn motion_refused_until_homed() {
    let table = sim_table();
    assert_eq!(table.send("G X10"), "err NOT_HOMED");
    assert_eq!(table.send("DX 5"), "err NOT_HOMED");
    assert_eq!(table.send("ZERO"), "err NOT_HOMED");
    assert_eq!(table.x.pulses(), 0);
}

#[test]
fn targets_beyond_limits_are_clamped() {
    let table = sim_table();
    table.send("G28");
    assert_eq!(table.send("G X500 Y-20"), "ok");
    assert_eq!(
        table.send("M114"),
        "X:165.000 Y:0.000 HX:1 HY:1 EN:1 ESTOP:0"
    );
}

#[test]
fn work_position_round_trip() {
    let table = sim_table();
    table.send("G28");
    assert_eq!(table.send("SET WORK X80 Y120 F6000"), "ok");
    assert_eq!(table.send("WORK"), "ok IN_WORK_POS");
    assert!(table.send("M114").starts_with("X:80.000 Y:120.000"));
    assert_eq!(table.send("ZERO"), "ok IN_ZERO_POS");
    assert!(table.send("M114").starts_with("X:0.000 Y:0.000"));
}

#[test]
fn calibrate_from_unknown_position() {
    let table = sim_table();
    table.x.set_position_mm(120.0);
    table.y.set_position_mm(7.5);
    assert_eq!(table.send("CAL"), "ok CALIBRATED");
    assert!(table.x.position_mm().abs() < 1e-9);
    assert!(table.y.position_mm().abs() < 1e-9);
}

#[test]
fn homing_failure_names_the_axis() {
    let table = sim_table();
    table.y.force_endstop(Some(false));
    assert_eq!(table.send("G28"), "err HOME_Y_NOT_FOUND");
    assert!(table.send("M114").contains("HX:1 HY:0"));

    table.x.force_endstop(Some(false));
    assert_eq!(table.send("G28"), "err HOME_NOT_FOUND");
}
