//! E-STOP pressed while the table is moving.
//!
//! The cycle thread is blocked inside the move request here; only the
//! watcher thread sees the input. These runs use wall-clock time.

use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use xyscrew_common::safety::{EstopCause, EstopLatch};
use xyscrew_common::time::{Clock, MonotonicClock};
use xyscrew_cycle::drivers::simulation::SimIo;
use xyscrew_cycle::program::StepKind;
use xyscrew_cycle::{CycleState, CycleStateMachine, EstopWatcher, MotionLink, StreamLink};
use xyscrew_motion::transport::serve_session;

use super::common::{
    DEVICE, long_move_config, press_estop_during, rig_with, status_x, step, wall_clock_table,
};

#[test]
fn estop_during_free_move_in_process() {
    let config = long_move_config(StepKind::Free);
    let clock = MonotonicClock::shared();
    let estop = EstopLatch::new();
    let server = wall_clock_table(estop.clone());
    let table = server.client();

    let sim = SimIo::new(&config.io, clock.clone());
    let link = server.client();
    let watcher = EstopWatcher::spawn(
        Box::new(sim.clone()),
        config.io.estop_sensor.clone(),
        estop.clone(),
        link.estop_signal(),
        config.timeouts.poll(),
    )
    .unwrap();
    let mut machine = CycleStateMachine::new(
        &config,
        Box::new(link),
        Box::new(sim.clone()),
        Box::new(sim.clone()),
        clock,
        estop.clone(),
    );
    machine.load_device(DEVICE).unwrap();

    let press = press_estop_during(
        &sim,
        machine.status_handle(),
        CycleState::MovingFree,
        Duration::from_millis(100),
    );
    let started = Instant::now();
    assert_eq!(machine.start().unwrap(), CycleState::Estop);
    assert!(started.elapsed() < Duration::from_secs(10));
    press.join().unwrap();
    watcher.stop();

    let status = machine.status();
    assert_eq!(status.error_code.as_deref(), Some("ESTOP"));
    assert_eq!(status.current_step, Some(0));
    assert_eq!(status.cycle_count, 0);
    assert_eq!(estop.cause(), Some(EstopCause::Signal));

    let m114 = table.send("M114").unwrap().to_string();
    assert!(m114.contains("HX:0 HY:0"), "{m114}");
    assert!(m114.ends_with("ESTOP:1"), "{m114}");
    assert!(status_x(&m114) < 150.0, "{m114}");
}

#[test]
fn estop_during_work_move_over_stream_link() {
    let config = long_move_config(StepKind::Work);
    let clock = MonotonicClock::shared();

    // Motion node with a latch of its own, behind a byte stream.
    let server = wall_clock_table(EstopLatch::new());
    let table = server.client();
    let session = server.client();
    let (near, far) = UnixStream::pair().unwrap();
    let far_reader = BufReader::new(far.try_clone().unwrap());
    thread::spawn(move || serve_session(&session, far_reader, far, None));

    let link = StreamLink::new(
        BufReader::new(near.try_clone().unwrap()),
        near,
        clock.clone(),
        Duration::from_secs(60),
    );
    let sim = SimIo::new(&config.io, clock.clone());
    let estop = EstopLatch::new();
    let watcher = EstopWatcher::spawn(
        Box::new(sim.clone()),
        config.io.estop_sensor.clone(),
        estop.clone(),
        link.estop_signal(),
        config.timeouts.poll(),
    )
    .unwrap();
    let mut machine = CycleStateMachine::new(
        &config,
        Box::new(link),
        Box::new(sim.clone()),
        Box::new(sim.clone()),
        clock,
        estop.clone(),
    );
    machine.load_device(DEVICE).unwrap();

    let press = press_estop_during(
        &sim,
        machine.status_handle(),
        CycleState::MovingWork,
        Duration::from_millis(100),
    );
    let started = Instant::now();
    assert_eq!(machine.start().unwrap(), CycleState::Estop);
    assert!(started.elapsed() < Duration::from_secs(10));
    press.join().unwrap();
    watcher.stop();

    let status = machine.status();
    assert_eq!(status.error_code.as_deref(), Some("ESTOP"));
    assert_eq!(status.holes_completed, 0);
    assert_eq!(sim.pulses("feeder"), 0);
    assert_eq!(estop.cause(), Some(EstopCause::Signal));

    assert_eq!(table.estop().cause(), Some(EstopCause::Command));
    let m114 = table.send("M114").unwrap().to_string();
    assert!(m114.contains("HX:0 HY:0"), "{m114}");
    assert!(m114.ends_with("ESTOP:1"), "{m114}");
    assert!(status_x(&m114) < 150.0, "{m114}");
}

#[test]
fn estop_after_last_move_blocks_completion() {
    let mut config = long_move_config(StepKind::Free);
    // Two legs on the simulated timeline, no park: 322 mm each at 6000 mm/min.
    config.devices[0].steps = vec![
        step(10.0, 10.0, StepKind::Free),
        step(150.0, 300.0, StepKind::Free),
    ];
    let mut rig = rig_with(config);
    rig.machine.load_device(DEVICE).unwrap();
    assert_eq!(rig.machine.start().unwrap(), CycleState::Completed);
    rig.machine.reset().unwrap();

    // Second run skips homing; the input drops while the last leg runs.
    rig.sim.estop_at(rig.clock.now() + Duration::from_secs(5));
    assert_eq!(rig.machine.start().unwrap(), CycleState::Estop);
    let status = rig.machine.status();
    assert_eq!(status.cycle_count, 1);
    assert_eq!(status.error_code.as_deref(), Some("ESTOP"));
    assert!(rig.motion("M114").ends_with("ESTOP:1"));
}

