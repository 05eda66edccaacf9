//! Pin driver registry.
//!
//! The binary selects a driver by name (`--driver`). Each driver provides a
//! factory building the [`StepperPins`] of one axis from the motion
//! configuration. Constructed at startup and passed by value; no global
//! state.

pub mod simulation;

use std::collections::HashMap;

use thiserror::Error;

use crate::axis::AxisId;
use crate::config::MotionConfig;
use crate::pins::StepperPins;

/// Builds the pins of one axis.
pub type PinsFactory = fn(AxisId, &MotionConfig) -> Box<dyn StepperPins>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("unknown pin driver '{0}'")]
    DriverNotFound(String),
    #[error("pin driver '{0}' is already registered")]
    AlreadyRegistered(&'static str),
}

/// Registry of available pin drivers.
pub struct DriverRegistry {
    factories: HashMap<&'static str, PinsFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in driver.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(simulation::DRIVER_NAME, simulation::create_pins);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: PinsFactory) -> Result<(), DriverError> {
        if self.factories.contains_key(name) {
            return Err(DriverError::AlreadyRegistered(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build the pins of `axis` using driver `name`.
    pub fn create_pins(
        &self,
        name: &str,
        axis: AxisId,
        config: &MotionConfig,
    ) -> Result<Box<dyn StepperPins>, DriverError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DriverError::DriverNotFound(name.to_string()))?;
        Ok(factory(axis, config))
    }

    /// All registered driver names, sorted.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
