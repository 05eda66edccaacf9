//! Shared fixtures: simulated table behind a running motion thread.

use xyscrew_common::safety::EstopLatch;
use xyscrew_common::time::{MonotonicClock, SharedClock, SimClock};
use xyscrew_motion::config::MotionConfig;
use xyscrew_motion::drivers::simulation::SimAxis;
use xyscrew_motion::rt::RtOptions;
use xyscrew_motion::{MotionClient, MotionEngine, MotionServer};

pub struct Table {
    pub server: MotionServer,
    pub client: MotionClient,
    pub x: SimAxis,
    pub y: SimAxis,
    pub estop: EstopLatch,
}

impl Table {
    pub fn send(&self, line: &str) -> String {
        self.client.send(line).unwrap().to_string()
    }
}

/// Table on simulated time; moves complete instantly in wall time.
pub fn sim_table() -> Table {
    table(MotionConfig::default(), SimClock::new().shared())
}

/// Short-travel table on the wall clock, for tests that race a move.
pub fn realtime_table() -> Table {
    let mut config = MotionConfig::default();
    config.homing.backoff_mm = 0.5;
    config.homing.fast_mm_min = 6000.0;
    config.homing.slow_mm_min = 1200.0;
    config.simulation.x_start_mm = 1.0;
    config.simulation.y_start_mm = 1.0;
    table(config, MonotonicClock::shared())
}

pub fn table(config: MotionConfig, clock: SharedClock) -> Table {
    let x = SimAxis::new(config.axes.x.steps_per_mm, config.simulation.x_start_mm);
    let y = SimAxis::new(config.axes.y.steps_per_mm, config.simulation.y_start_mm);
    let estop = EstopLatch::new();
    let engine = MotionEngine::new(
        &config,
        Box::new(x.clone()),
        Box::new(y.clone()),
        clock,
        estop.clone(),
    );
    let server = MotionServer::spawn(engine, RtOptions::default()).unwrap();
    let client = server.client();
    Table {
        server,
        client,
        x,
        y,
        estop,
    }
}
