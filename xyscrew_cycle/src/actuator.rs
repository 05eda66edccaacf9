//! Screw station actuator sequences.
//!
//! Every wait here is bounded by a configured watchdog and cancelled by an
//! emergency stop: the shared latch or the station's E-STOP input. An
//! unreadable E-STOP input counts as pressed.

use std::time::Duration;

use tracing::{debug, error, warn};
use xyscrew_common::io::{IoError, RelayInterface, SensorInterface, SensorLevel};
use xyscrew_common::safety::{EstopCause, EstopLatch};
use xyscrew_common::time::SharedClock;
use xyscrew_common::wait::{WaitOutcome, wait_until};

use crate::config::{CycleConfig, IoConfig, PulseConfig, TimeoutConfig};
use crate::error::{Actuator, CycleError};

/// Relays, sensors and watchdogs of one screw station.
pub struct ScrewStation {
    relays: Box<dyn RelayInterface>,
    sensors: Box<dyn SensorInterface>,
    io: IoConfig,
    timeouts: TimeoutConfig,
    pulses: PulseConfig,
    clock: SharedClock,
    estop: EstopLatch,
}

impl ScrewStation {
    pub fn new(
        config: &CycleConfig,
        relays: Box<dyn RelayInterface>,
        sensors: Box<dyn SensorInterface>,
        clock: SharedClock,
        estop: EstopLatch,
    ) -> Self {
        Self {
            relays,
            sensors,
            io: config.io.clone(),
            timeouts: config.timeouts.clone(),
            pulses: config.pulses.clone(),
            clock,
            estop,
        }
    }

    pub fn estop_latch(&self) -> &EstopLatch {
        &self.estop
    }

    pub fn io(&self) -> &IoConfig {
        &self.io
    }

    // ─── Safety ─────────────────────────────────────────────────────

    /// Cause of an active emergency stop, latching the input if it is
    /// pressed.
    pub fn estop_tripped(&self) -> Option<EstopCause> {
        if self.estop.is_active() {
            return Some(self.estop.cause().unwrap_or(EstopCause::Signal));
        }
        let pressed = match self.sensors.read(&self.io.estop_sensor) {
            Ok(level) => level.is_active(),
            Err(e) => {
                error!("E-STOP input unreadable: {e}");
                true
            }
        };
        if pressed {
            self.estop.trigger(EstopCause::Signal);
            return Some(self.estop.cause().unwrap_or(EstopCause::Signal));
        }
        None
    }

    /// Level of the E-STOP input, without touching the latch.
    pub fn estop_input(&self) -> Result<SensorLevel, IoError> {
        self.sensors.read(&self.io.estop_sensor)
    }

    fn check_safety(&self) -> Result<(), CycleError> {
        match self.estop_tripped() {
            Some(cause) => Err(CycleError::Safety(cause)),
            None => Ok(()),
        }
    }

    /// Wait for `sensor` to reach `level`. `Ok(false)` on timeout.
    fn wait_level(
        &self,
        sensor: &str,
        level: SensorLevel,
        timeout: Duration,
    ) -> Result<bool, CycleError> {
        let mut fault = None;
        let outcome = wait_until(
            self.clock.as_ref(),
            timeout,
            self.timeouts.poll(),
            || match self.sensors.read(sensor) {
                Ok(l) => l == level,
                Err(e) => {
                    fault = Some(e);
                    true
                }
            },
            || self.estop_tripped().is_some(),
        );
        if let Some(e) = fault {
            return Err(e.into());
        }
        match outcome {
            WaitOutcome::Satisfied => Ok(true),
            WaitOutcome::TimedOut => Ok(false),
            WaitOutcome::Cancelled => Err(CycleError::Safety(
                self.estop.cause().unwrap_or(EstopCause::Signal),
            )),
        }
    }

    // ─── Sequences ──────────────────────────────────────────────────

    /// Pulse the feeder until the presence sensor sees a screw. Returns
    /// the attempt that succeeded.
    pub fn feed_screw(&mut self) -> Result<u32, CycleError> {
        let attempts = self.timeouts.screw_feed_attempts;
        for attempt in 1..=attempts {
            self.check_safety()?;
            self.relays.pulse(&self.io.feeder_relay, self.pulses.feeder())?;
            if self.wait_level(
                &self.io.screw_present_sensor,
                SensorLevel::Active,
                self.timeouts.screw_feed(),
            )? {
                debug!("Screw present after feed attempt {attempt}");
                return Ok(attempt);
            }
            warn!("No screw after feed attempt {attempt}/{attempts}");
        }
        Err(CycleError::ScrewNotDetected { attempts })
    }

    /// Torque mode on, cylinder down.
    pub fn lower(&mut self) -> Result<(), CycleError> {
        self.check_safety()?;
        self.relays.set(&self.io.torque_mode_relay, true)?;
        self.relays.set(&self.io.cylinder_relay, true)?;
        if !self.wait_level(
            &self.io.cylinder_down_sensor,
            SensorLevel::Active,
            self.timeouts.cylinder_down(),
        )? {
            return Err(CycleError::ActuatorTimeout(Actuator::CylinderDown));
        }
        Ok(())
    }

    /// Wait for the screwdriver to report torque.
    pub fn drive(&mut self) -> Result<(), CycleError> {
        if !self.wait_level(
            &self.io.torque_reached_sensor,
            SensorLevel::Active,
            self.timeouts.torque(),
        )? {
            return Err(CycleError::ActuatorTimeout(Actuator::Torque));
        }
        Ok(())
    }

    /// Torque mode off, cylinder up, then confirm the down sensor cleared.
    pub fn raise(&mut self) -> Result<(), CycleError> {
        self.relays.set(&self.io.torque_mode_relay, false)?;
        self.relays.set(&self.io.cylinder_relay, false)?;
        if !self.wait_level(
            &self.io.cylinder_up_sensor,
            SensorLevel::Active,
            self.timeouts.cylinder_up(),
        )? {
            return Err(CycleError::ActuatorTimeout(Actuator::CylinderUp));
        }
        let down = self.sensors.read(&self.io.cylinder_down_sensor)?;
        if down.is_active() {
            return Err(CycleError::UnexpectedSensorState {
                sensor: self.io.cylinder_down_sensor.clone(),
                level: down,
            });
        }
        Ok(())
    }

    /// Short free-run pulse to clear the bit.
    pub fn free_run(&mut self) -> Result<(), CycleError> {
        self.relays
            .pulse(&self.io.free_run_relay, self.pulses.free_run())?;
        Ok(())
    }

    /// Torque off, cylinder up, free-run pulse. All three are attempted;
    /// the first failure is returned.
    pub fn release(&mut self) -> Result<(), CycleError> {
        let torque = self.relays.set(&self.io.torque_mode_relay, false);
        let cylinder = self.relays.set(&self.io.cylinder_relay, false);
        let spindle = self
            .relays
            .pulse(&self.io.free_run_relay, self.pulses.free_run());
        torque.and(cylinder).and(spindle)?;
        Ok(())
    }

    /// Best-effort release; failures are logged.
    pub fn safe_state(&mut self) {
        if let Err(e) = self.release() {
            error!("Failed to bring station to a safe state: {e}");
        }
    }
}
