//! E-STOP while motion is in flight, and the recovery sequence.

use std::thread;
use std::time::{Duration, Instant};

use xyscrew_common::safety::EstopCause;
use xyscrew_common::time::MonotonicClock;
use xyscrew_motion::config::MotionConfig;
use xyscrew_motion::drivers::simulation::SimAxis;

use super::common::{realtime_table, sim_table, table};

#[test]
fn estop_interrupts_move_from_another_client() {
    let table = realtime_table();
    assert_eq!(table.send("G28"), "ok IN_HOME_POS");

    // 150 mm at 100 mm/s: well over a second of pulses.
    let mover = table.client.clone();
    let started = Instant::now();
    let handle = thread::spawn(move || mover.send("G X150").unwrap().to_string());

    thread::sleep(Duration::from_millis(150));
    table.client.emergency_stop(EstopCause::Operator).unwrap();

    assert_eq!(handle.join().unwrap(), "err ESTOP");
    assert!(started.elapsed() < Duration::from_millis(900));
    let stopped_at = table.x.position_mm();
    assert!(stopped_at > 0.0 && stopped_at < 100.0, "stopped at {stopped_at}");
    assert!(!table.x.is_enabled());
    assert_eq!(table.estop.cause(), Some(EstopCause::Operator));
}

#[test]
fn estop_rejects_motion_until_cleared_and_rehomed() {
    let table = sim_table();
    table.send("G28");
    table.send("G X50 Y50");

    assert_eq!(table.send("M112"), "ok ESTOP");
    assert_eq!(
        table.send("M114"),
        "X:50.000 Y:50.000 HX:0 HY:0 EN:0 ESTOP:1"
    );
    for line in ["G X10", "G28", "M17", "SET WORK X1 Y1", "QUIT"] {
        assert_eq!(table.send(line), "err ESTOP", "{line}");
    }
    assert_eq!(table.send("PING"), "PONG");
    assert_eq!(table.send("M119"), "X_MIN:open Y_MIN:open");

    assert_eq!(table.send("M999"), "ok");
    assert!(table.send("M114").ends_with("HX:0 HY:0 EN:1 ESTOP:0"));
    assert_eq!(table.send("G X10"), "err NOT_HOMED");
    assert_eq!(table.send("G28"), "ok IN_HOME_POS");
    assert_eq!(table.send("G X10"), "ok");
}

#[test]
fn estop_mid_pulse_train_stops_within_one_pulse() {
    let table = sim_table();
    table.send("G28");
    let before = table.x.pulses();
    table
        .x
        .trip_estop_after(before + 800, table.estop.clone(), EstopCause::Signal);

    assert_eq!(table.send("G X50"), "err ESTOP");
    assert_eq!(table.x.pulses(), before + 800);
    assert!((table.x.position_mm() - 10.0).abs() < 1e-9);
}

#[test]
fn homing_timeout_bounds_wall_time() {
    let mut config = MotionConfig::default();
    config.homing.timeout_s = 0.3;
    let table = table(config, MonotonicClock::shared());
    table.x.force_endstop(Some(false));

    let started = Instant::now();
    assert_eq!(table.send("HOME X"), "err HOME_X_NOT_FOUND");
    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(table.send("M114").contains("HX:0"));
}

#[test]
fn shutdown_disables_drivers() {
    let x = {
        let table = sim_table();
        table.send("M17");
        assert!(table.x.is_enabled());
        let x: SimAxis = table.x.clone();
        table.server.shutdown();
        x
    };
    assert!(!x.is_enabled());
}
