//! Guarded moves against the MIN switches.

use super::common::sim_table;

#[test]
fn slipped_carriages_stop_on_both_switches() {
    let table = sim_table();
    table.send("G28");
    table.send("G X100 Y100");
    // Both carriages lost steps: physically much closer to MIN.
    table.x.set_position_mm(30.0);
    table.y.set_position_mm(20.0);

    assert_eq!(table.send("G X0 Y0"), "ok ENDSTOP_XY");
    assert_eq!(table.send("M119"), "X_MIN:TRIGGERED Y_MIN:TRIGGERED");
}

#[test]
fn one_switch_does_not_stop_the_other_axis() {
    let table = sim_table();
    table.send("G28");
    table.send("G X100 Y100");
    table.x.set_position_mm(30.0);

    assert_eq!(table.send("ZERO"), "ok ENDSTOP_X");
    // Y travelled its full 100 mm.
    assert!(table.y.position_mm().abs() < 1e-9);
    assert!(table.send("M114").starts_with("X:0.000 Y:0.000"));
}

#[test]
fn fast_move_ignores_switches() {
    let table = sim_table();
    table.send("G28");
    table.send("G X100");
    table.x.set_position_mm(30.0);

    assert_eq!(table.send("G0 X0"), "ok");
    // Unguarded: the full 100 mm of pulses went out.
    assert!((table.x.position_mm() + 70.0).abs() < 1e-9);
}

#[test]
fn moves_away_from_min_ignore_a_stuck_switch() {
    let table = sim_table();
    table.send("G28");
    table.x.force_endstop(Some(true));
    assert_eq!(table.send("G X40"), "ok");
    assert!((table.x.position_mm() - 40.0).abs() < 1e-9);
}
