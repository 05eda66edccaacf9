//! Screw station I/O driver registry.
//!
//! The binary selects a backend by name (`--io`). A factory returns the
//! relay and sensor halves of one station plus a second handle on its
//! inputs for the E-STOP watcher; they may share state internally.

pub mod simulation;

use std::collections::HashMap;

use thiserror::Error;
use xyscrew_common::io::{RelayInterface, SensorInterface};
use xyscrew_common::time::SharedClock;

use crate::config::IoConfig;

/// Relay and sensor sides of one station.
pub struct IoPair {
    pub relays: Box<dyn RelayInterface>,
    pub sensors: Box<dyn SensorInterface>,
    /// Read by the E-STOP watcher thread.
    pub estop_input: Box<dyn SensorInterface>,
}

/// Builds the I/O of one station.
pub type IoFactory = fn(&IoConfig, SharedClock) -> IoPair;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("unknown I/O driver '{0}'")]
    DriverNotFound(String),
    #[error("I/O driver '{0}' is already registered")]
    AlreadyRegistered(&'static str),
}

/// Registry of available I/O drivers.
pub struct IoDriverRegistry {
    factories: HashMap<&'static str, IoFactory>,
}

impl IoDriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in driver.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(simulation::DRIVER_NAME, simulation::create_io);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: IoFactory) -> Result<(), DriverError> {
        if self.factories.contains_key(name) {
            return Err(DriverError::AlreadyRegistered(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn create_io(
        &self,
        name: &str,
        io: &IoConfig,
        clock: SharedClock,
    ) -> Result<IoPair, DriverError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DriverError::DriverNotFound(name.to_string()))?;
        Ok(factory(io, clock))
    }

    /// All registered driver names, sorted.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for IoDriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
