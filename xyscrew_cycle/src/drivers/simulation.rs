//! Simulated screw station I/O.
//!
//! [`SimIo`] models the station on the shared [`Clock`] timeline: the
//! cylinder takes `cylinder_travel` to reach either sensor, the screwdriver
//! reports torque `torque_delay` after it is down in torque mode, and every
//! feeder pulse drops one screw under the bit. Fault injectors make each
//! cycle failure path reproducible.
//!
//! Handles are clones sharing one state, so a test keeps a handle while the
//! cycle owns the relay and sensor sides.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use xyscrew_common::io::{IoError, RelayInterface, SensorInterface, SensorLevel};
use xyscrew_common::time::{Clock, SharedClock};
use xyscrew_common::wait::wait_until;

use crate::config::IoConfig;

use super::IoPair;

pub const DRIVER_NAME: &str = "simulation";

const WAIT_POLL: Duration = Duration::from_millis(1);

/// Factory registered under [`DRIVER_NAME`].
pub fn create_io(io: &IoConfig, clock: SharedClock) -> IoPair {
    let sim = SimIo::new(io, clock);
    IoPair {
        relays: Box::new(sim.clone()),
        sensors: Box::new(sim.clone()),
        estop_input: Box::new(sim),
    }
}

/// Mechanical timing of the simulated station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBehaviour {
    pub cylinder_travel: Duration,
    pub torque_delay: Duration,
}

impl Default for SimBehaviour {
    fn default() -> Self {
        Self {
            cylinder_travel: Duration::from_millis(150),
            torque_delay: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Relay {
    on: bool,
    /// Last switch time; `None` while still in the power-on state.
    since: Option<Duration>,
    pulses: u32,
}

#[derive(Debug)]
struct SimState {
    names: IoConfig,
    behaviour: SimBehaviour,
    relays: HashMap<String, Relay>,
    history: Vec<(String, bool)>,
    screw_loaded: bool,
    empty_feeds: u32,
    torque_misses: u32,
    miss_this_hole: bool,
    cylinder_jammed: bool,
    up_sensor_dead: bool,
    down_sensor_stuck: bool,
    estop_input: bool,
    estop_after_torque: Option<Duration>,
    estop_at: Option<Duration>,
}

impl SimState {
    fn relay(&self, name: &str) -> Relay {
        self.relays.get(name).copied().unwrap_or_default()
    }

    fn is_relay(&self, name: &str) -> bool {
        let n = &self.names;
        [
            &n.feeder_relay,
            &n.cylinder_relay,
            &n.torque_mode_relay,
            &n.free_run_relay,
        ]
        .into_iter()
        .any(|r| r == name)
    }

    fn switch(&mut self, name: &str, on: bool, now: Duration) -> Result<(), IoError> {
        if !self.is_relay(name) {
            return Err(IoError::UnknownChannel(name.to_string()));
        }
        let relay = self.relays.entry(name.to_string()).or_default();
        if relay.on == on {
            return Ok(());
        }
        relay.on = on;
        relay.since = Some(now);
        self.history.push((name.to_string(), on));

        if on && name == self.names.cylinder_relay {
            // The bit pushes the screw into the hole.
            self.screw_loaded = false;
        }
        if on && name == self.names.torque_mode_relay {
            self.miss_this_hole = self.torque_misses > 0;
            self.torque_misses = self.torque_misses.saturating_sub(1);
        }
        Ok(())
    }

    fn finish_pulse(&mut self, name: &str) {
        self.relays.entry(name.to_string()).or_default().pulses += 1;
        if name == self.names.feeder_relay {
            if self.empty_feeds > 0 {
                self.empty_feeds -= 1;
            } else {
                self.screw_loaded = true;
            }
        }
    }

    /// Time the cylinder reached its down position, if it is there.
    fn down_since(&self, now: Duration) -> Option<Duration> {
        let cylinder = self.relay(&self.names.cylinder_relay);
        let since = cylinder.since?;
        let reached = since + self.behaviour.cylinder_travel;
        (cylinder.on && !self.cylinder_jammed && now >= reached).then_some(reached)
    }

    fn cylinder_down(&self, now: Duration) -> bool {
        let cylinder = self.relay(&self.names.cylinder_relay);
        if cylinder.on {
            self.down_since(now).is_some()
        } else {
            self.down_sensor_stuck
        }
    }

    fn cylinder_up(&self, now: Duration) -> bool {
        let cylinder = self.relay(&self.names.cylinder_relay);
        if cylinder.on || self.up_sensor_dead {
            return false;
        }
        match cylinder.since {
            None => true,
            Some(since) => now >= since + self.behaviour.cylinder_travel,
        }
    }

    fn torque_reached(&self, now: Duration) -> bool {
        let torque = self.relay(&self.names.torque_mode_relay);
        let (true, Some(torque_on)) = (torque.on, torque.since) else {
            return false;
        };
        match self.down_since(now) {
            Some(down) if !self.miss_this_hole => {
                now >= torque_on.max(down) + self.behaviour.torque_delay
            }
            _ => false,
        }
    }

    fn estop(&mut self, now: Duration) -> bool {
        if let Some(delay) = self.estop_after_torque {
            let torque = self.relay(&self.names.torque_mode_relay);
            if let (true, Some(since)) = (torque.on, torque.since)
                && now >= since + delay
            {
                self.estop_input = true;
                self.estop_after_torque = None;
            }
        }
        if self.estop_at.is_some_and(|at| now >= at) {
            self.estop_input = true;
            self.estop_at = None;
        }
        self.estop_input
    }

    fn sense(&mut self, name: &str, now: Duration) -> Result<bool, IoError> {
        let n = &self.names;
        if name == n.screw_present_sensor {
            Ok(self.screw_loaded)
        } else if name == n.cylinder_down_sensor {
            Ok(self.cylinder_down(now))
        } else if name == n.cylinder_up_sensor {
            Ok(self.cylinder_up(now))
        } else if name == n.torque_reached_sensor {
            Ok(self.torque_reached(now))
        } else if name == n.estop_sensor {
            Ok(self.estop(now))
        } else {
            Err(IoError::UnknownChannel(name.to_string()))
        }
    }
}

/// Shared handle to one simulated screw station.
#[derive(Clone)]
pub struct SimIo {
    state: Arc<Mutex<SimState>>,
    clock: SharedClock,
}

impl SimIo {
    pub fn new(names: &IoConfig, clock: SharedClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                names: names.clone(),
                behaviour: SimBehaviour::default(),
                relays: HashMap::new(),
                history: Vec::new(),
                screw_loaded: false,
                empty_feeds: 0,
                torque_misses: 0,
                miss_this_hole: false,
                cylinder_jammed: false,
                up_sensor_dead: false,
                down_sensor_stuck: false,
                estop_input: false,
                estop_after_torque: None,
                estop_at: None,
            })),
            clock,
        }
    }

    pub fn with_behaviour(self, behaviour: SimBehaviour) -> Self {
        self.state.lock().behaviour = behaviour;
        self
    }

    // ─── Fault injection ────────────────────────────────────────────

    /// The next `count` feeder pulses deliver nothing.
    pub fn empty_feeds(&self, count: u32) {
        self.state.lock().empty_feeds = count;
    }

    /// The next `count` holes never reach torque.
    pub fn miss_torque(&self, count: u32) {
        self.state.lock().torque_misses = count;
    }

    /// Cylinder never reaches its down sensor.
    pub fn jam_cylinder(&self, jammed: bool) {
        self.state.lock().cylinder_jammed = jammed;
    }

    /// Cylinder-up sensor never reports.
    pub fn kill_up_sensor(&self, dead: bool) {
        self.state.lock().up_sensor_dead = dead;
    }

    /// Cylinder-down sensor stays active after the cylinder leaves.
    pub fn stick_down_sensor(&self, stuck: bool) {
        self.state.lock().down_sensor_stuck = stuck;
    }

    /// Press or release the E-STOP input. Releasing also disarms
    /// [`SimIo::estop_after_torque_on`] and [`SimIo::estop_at`].
    pub fn set_estop(&self, active: bool) {
        let mut state = self.state.lock();
        state.estop_input = active;
        if !active {
            state.estop_after_torque = None;
            state.estop_at = None;
        }
    }

    /// Press E-STOP once the station clock reaches `at`.
    pub fn estop_at(&self, at: Duration) {
        self.state.lock().estop_at = Some(at);
    }

    /// Press E-STOP `delay` after torque mode switches on.
    pub fn estop_after_torque_on(&self, delay: Duration) {
        self.state.lock().estop_after_torque = Some(delay);
    }

    // ─── Observation ────────────────────────────────────────────────

    pub fn relay(&self, name: &str) -> bool {
        self.state.lock().relay(name).on
    }

    /// Completed pulses on relay `name`.
    pub fn pulses(&self, name: &str) -> u32 {
        self.state.lock().relay(name).pulses
    }

    /// Every relay switch so far, in order.
    pub fn history(&self) -> Vec<(String, bool)> {
        self.state.lock().history.clone()
    }
}

impl std::fmt::Debug for SimIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimIo").field("state", &*self.state.lock()).finish()
    }
}

impl RelayInterface for SimIo {
    fn set(&mut self, name: &str, on: bool) -> Result<(), IoError> {
        let now = self.clock.now();
        self.state.lock().switch(name, on, now)
    }

    fn pulse(&mut self, name: &str, duration: Duration) -> Result<(), IoError> {
        self.set(name, true)?;
        self.clock.sleep(duration);
        self.set(name, false)?;
        self.state.lock().finish_pulse(name);
        Ok(())
    }
}

impl SensorInterface for SimIo {
    fn read(&self, name: &str) -> Result<SensorLevel, IoError> {
        let now = self.clock.now();
        self.state
            .lock()
            .sense(name, now)
            .map(SensorLevel::from_bool)
    }

    fn wait_for(
        &self,
        name: &str,
        level: SensorLevel,
        timeout: Duration,
    ) -> Result<bool, IoError> {
        self.read(name)?;
        let outcome = wait_until(
            self.clock.as_ref(),
            timeout,
            WAIT_POLL,
            || self.read(name).is_ok_and(|l| l == level),
            || false,
        );
        Ok(outcome.is_satisfied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xyscrew_common::time::SimClock;

    fn sim() -> (SimIo, SimClock, IoConfig) {
        let clock = SimClock::new();
        let names = IoConfig::default();
        (SimIo::new(&names, clock.shared()), clock, names)
    }

    #[test]
    fn cylinder_travels_between_sensors() {
        let (mut io, clock, n) = sim();
        assert_eq!(io.read(&n.cylinder_up_sensor).unwrap(), SensorLevel::Active);
        assert_eq!(io.read(&n.cylinder_down_sensor).unwrap(), SensorLevel::Inactive);

        io.set(&n.cylinder_relay, true).unwrap();
        assert_eq!(io.read(&n.cylinder_up_sensor).unwrap(), SensorLevel::Inactive);
        assert!(
            io.wait_for(&n.cylinder_down_sensor, SensorLevel::Active, Duration::from_secs(1))
                .unwrap()
        );
        assert_eq!(clock.now(), Duration::from_millis(150));

        io.set(&n.cylinder_relay, false).unwrap();
        assert_eq!(io.read(&n.cylinder_down_sensor).unwrap(), SensorLevel::Inactive);
        assert!(
            io.wait_for(&n.cylinder_up_sensor, SensorLevel::Active, Duration::from_secs(1))
                .unwrap()
        );
    }

    #[test]
    fn feeder_pulse_loads_screw_and_cylinder_consumes_it() {
        let (mut io, clock, n) = sim();
        io.empty_feeds(1);
        io.pulse(&n.feeder_relay, Duration::from_millis(100)).unwrap();
        assert_eq!(io.read(&n.screw_present_sensor).unwrap(), SensorLevel::Inactive);
        io.pulse(&n.feeder_relay, Duration::from_millis(100)).unwrap();
        assert_eq!(io.read(&n.screw_present_sensor).unwrap(), SensorLevel::Active);
        assert_eq!(io.pulses(&n.feeder_relay), 2);
        assert_eq!(clock.now(), Duration::from_millis(200));

        io.set(&n.cylinder_relay, true).unwrap();
        assert_eq!(io.read(&n.screw_present_sensor).unwrap(), SensorLevel::Inactive);
    }

    #[test]
    fn torque_follows_cylinder_down() {
        let (mut io, clock, n) = sim();
        io.set(&n.torque_mode_relay, true).unwrap();
        io.set(&n.cylinder_relay, true).unwrap();
        clock.advance(Duration::from_millis(500));
        assert_eq!(io.read(&n.torque_reached_sensor).unwrap(), SensorLevel::Inactive);
        clock.advance(Duration::from_millis(50));
        assert_eq!(io.read(&n.torque_reached_sensor).unwrap(), SensorLevel::Active);
    }

    #[test]
    fn torque_miss_applies_per_hole() {
        let (mut io, clock, n) = sim();
        io.miss_torque(1);
        io.set(&n.cylinder_relay, true).unwrap();
        io.set(&n.torque_mode_relay, true).unwrap();
        clock.advance(Duration::from_secs(5));
        assert_eq!(io.read(&n.torque_reached_sensor).unwrap(), SensorLevel::Inactive);

        io.set(&n.torque_mode_relay, false).unwrap();
        io.set(&n.torque_mode_relay, true).unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(io.read(&n.torque_reached_sensor).unwrap(), SensorLevel::Active);
    }

    #[test]
    fn estop_trip_latches_until_released() {
        let (mut io, clock, n) = sim();
        io.estop_after_torque_on(Duration::from_millis(300));
        io.set(&n.torque_mode_relay, true).unwrap();
        clock.advance(Duration::from_millis(299));
        assert_eq!(io.read(&n.estop_sensor).unwrap(), SensorLevel::Inactive);
        clock.advance(Duration::from_millis(1));
        assert_eq!(io.read(&n.estop_sensor).unwrap(), SensorLevel::Active);

        io.set(&n.torque_mode_relay, false).unwrap();
        assert_eq!(io.read(&n.estop_sensor).unwrap(), SensorLevel::Active);
        io.set_estop(false);
        assert_eq!(io.read(&n.estop_sensor).unwrap(), SensorLevel::Inactive);
    }

    #[test]
    fn estop_at_presses_on_the_station_clock() {
        let (mut io, clock, n) = sim();
        io.estop_at(Duration::from_secs(2));
        clock.advance(Duration::from_millis(1999));
        assert_eq!(io.read(&n.estop_sensor).unwrap(), SensorLevel::Inactive);
        clock.advance(Duration::from_millis(1));
        assert_eq!(io.read(&n.estop_sensor).unwrap(), SensorLevel::Active);

        io.set_estop(false);
        io.estop_at(Duration::from_secs(10));
        io.set_estop(false);
        clock.advance(Duration::from_secs(20));
        assert_eq!(io.read(&n.estop_sensor).unwrap(), SensorLevel::Inactive);
    }

    #[test]
    fn unknown_channels_rejected() {
        let (mut io, _, _) = sim();
        assert!(matches!(io.set("laser", true), Err(IoError::UnknownChannel(_))));
        assert!(matches!(io.read("laser"), Err(IoError::UnknownChannel(_))));
        assert!(io.wait_for("laser", SensorLevel::Active, Duration::ZERO).is_err());
    }

    #[test]
    fn history_records_switches_only() {
        let (mut io, _, n) = sim();
        io.set(&n.cylinder_relay, true).unwrap();
        io.set(&n.cylinder_relay, true).unwrap();
        io.set(&n.cylinder_relay, false).unwrap();
        assert_eq!(
            io.history(),
            vec![
                (n.cylinder_relay.clone(), true),
                (n.cylinder_relay.clone(), false)
            ]
        );
    }
}
