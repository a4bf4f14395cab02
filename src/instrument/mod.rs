//! Instrument capability contracts and simulated implementations.
//!
//! The measurement loop drives exactly three instruments, each through a small
//! capability trait defined in [`capabilities`]. Concrete protocol drivers live
//! outside this crate; [`sim`] provides simulated devices for tests and dry runs.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod capabilities;
pub mod sim;

pub use capabilities::{
    CurrentReading, CurrentSensor, ElectrometerSettings, TemperatureSensor, VoltageSource,
};

/// Role an instrument plays in the run. Used to tag errors and log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentRole {
    /// Electrometer measuring the sample current.
    CurrentSensor,
    /// Programmable supply driving the stimulus.
    VoltageSource,
    /// Temperature transmitter.
    TemperatureSensor,
}

impl fmt::Display for InstrumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentRole::CurrentSensor => write!(f, "current sensor"),
            InstrumentRole::VoltageSource => write!(f, "voltage source"),
            InstrumentRole::TemperatureSensor => write!(f, "temperature sensor"),
        }
    }
}
