//! Shared fixtures: a simulated table and screw station on one clock.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use xyscrew_common::safety::EstopLatch;
use xyscrew_common::time::{MonotonicClock, SimClock};
use xyscrew_cycle::config::CycleConfig;
use xyscrew_cycle::drivers::simulation::SimIo;
use xyscrew_cycle::program::{DeviceProgram, ProgramStep, StepKind};
use xyscrew_cycle::{CycleState, CycleStateMachine, StatusHandle};
use xyscrew_motion::config::MotionConfig;
use xyscrew_motion::drivers::simulation::SimAxis;
use xyscrew_motion::rt::RtOptions;
use xyscrew_motion::{MotionClient, MotionEngine, MotionServer};

pub const DEVICE: &str = "pcb-a";

pub struct Rig {
    pub machine: CycleStateMachine,
    pub sim: SimIo,
    pub clock: SimClock,
    /// Second client for inspecting the motion node.
    pub table: MotionClient,
    pub server: MotionServer,
}

impl Rig {
    pub fn motion(&self, line: &str) -> String {
        self.table.send(line).unwrap().to_string()
    }
}

pub fn step(x: f64, y: f64, kind: StepKind) -> ProgramStep {
    ProgramStep {
        x,
        y,
        kind,
        feed: None,
    }
}

/// Two free moves around three holes.
pub fn program() -> DeviceProgram {
    DeviceProgram {
        key: DEVICE.to_string(),
        name: Some("Test board".to_string()),
        steps: vec![
            step(10.0, 10.0, StepKind::Free),
            step(20.0, 30.0, StepKind::Work),
            step(60.0, 40.0, StepKind::Work),
            step(100.0, 80.0, StepKind::Free),
            step(120.0, 90.0, StepKind::Work),
        ],
    }
}

pub fn cycle_config() -> CycleConfig {
    let mut config = CycleConfig::default();
    config.devices.push(program());
    config
}

pub fn rig() -> Rig {
    rig_with(cycle_config())
}

pub fn rig_with(config: CycleConfig) -> Rig {
    let clock = SimClock::new();
    let estop = EstopLatch::new();

    let motion = MotionConfig::default();
    let x = SimAxis::new(motion.axes.x.steps_per_mm, motion.simulation.x_start_mm);
    let y = SimAxis::new(motion.axes.y.steps_per_mm, motion.simulation.y_start_mm);
    let engine = MotionEngine::new(
        &motion,
        Box::new(x),
        Box::new(y),
        clock.shared(),
        estop.clone(),
    );
    let server = MotionServer::spawn(engine, RtOptions::default()).unwrap();

    let sim = SimIo::new(&config.io, clock.shared());
    let machine = CycleStateMachine::new(
        &config,
        Box::new(server.client()),
        Box::new(sim.clone()),
        Box::new(sim.clone()),
        clock.shared(),
        estop,
    );
    Rig {
        machine,
        sim,
        clock,
        table: server.client(),
        server,
    }
}

/// Rig with the test device loaded.
pub fn loaded() -> Rig {
    let mut rig = rig();
    rig.machine.load_device(DEVICE).unwrap();
    rig
}

/// Motion node on wall-clock time, starting next to its endstops, so a
/// slow move lasts long enough to be interrupted from another thread.
pub fn wall_clock_table(estop: EstopLatch) -> MotionServer {
    let mut motion = MotionConfig::default();
    motion.simulation.x_start_mm = 1.0;
    motion.simulation.y_start_mm = 1.0;
    motion.homing.backoff_mm = 0.5;
    motion.homing.fast_mm_min = 6000.0;
    motion.homing.slow_mm_min = 600.0;
    let x = SimAxis::new(motion.axes.x.steps_per_mm, motion.simulation.x_start_mm);
    let y = SimAxis::new(motion.axes.y.steps_per_mm, motion.simulation.y_start_mm);
    let engine = MotionEngine::new(
        &motion,
        Box::new(x),
        Box::new(y),
        MonotonicClock::shared(),
        estop,
    );
    MotionServer::spawn(engine, RtOptions::default()).unwrap()
}

/// One slow step to the far corner: over 30 s of travel at 600 mm/min.
pub fn long_move_config(kind: StepKind) -> CycleConfig {
    let mut config = CycleConfig::default();
    config.park_on_complete = false;
    config.devices.push(DeviceProgram {
        key: DEVICE.to_string(),
        name: None,
        steps: vec![ProgramStep {
            x: 150.0,
            y: 300.0,
            kind,
            feed: Some(600.0),
        }],
    });
    config
}

/// Press E-STOP on `sim` once `status` has shown `state` for `delay`.
pub fn press_estop_during(
    sim: &SimIo,
    status: StatusHandle,
    state: CycleState,
    delay: Duration,
) -> JoinHandle<()> {
    let sim = sim.clone();
    thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(10);
        while status.state() != state {
            assert!(Instant::now() < deadline, "never reached {state}");
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(delay);
        sim.set_estop(true);
    })
}

/// X position from an `M114` line.
pub fn status_x(m114: &str) -> f64 {
    m114.strip_prefix("X:")
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|x| x.parse().ok())
        .unwrap_or_else(|| panic!("not a status line: {m114}"))
}
