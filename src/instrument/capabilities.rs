//! Instrument Capabilities
//!
//! Fine-grained capability traits for the three instruments of a
//! current-response run. The orchestrator only ever talks to hardware through
//! these contracts, so any driver (serial, VISA, TCP socket, simulated) can be
//! substituted without touching the measurement loop.
//!
//! - An electrometer implements: `CurrentSensor`
//! - A bench supply implements: `VoltageSource`
//! - A temperature transmitter implements: `TemperatureSensor`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE instrument role
//!
//! Calls are issued strictly one at a time by the orchestrator. Implementations
//! should still use interior mutability (Mutex/RwLock) for their state, since
//! all methods take `&self`.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn snapshot<C, V>(sensor: &C, supply: &V) -> Result<(f64, f64)>
//! where
//!     C: CurrentSensor,
//!     V: VoltageSource,
//! {
//!     let reading = sensor.read_latest().await?;
//!     let volts = supply.get_voltage().await?;
//!     Ok((reading.current, volts))
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One electrometer sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentReading {
    /// Measured current in amperes (signed).
    pub current: f64,
    /// Seconds since the last relative clock reset, on the instrument's clock.
    pub relative_timestamp: f64,
}

/// Measurement settings applied to the electrometer once, before the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrometerSettings {
    /// Upper limit of the current range in amperes.
    pub range_a: f64,
    /// Integration period in power line cycles.
    pub nplc: f64,
    /// Averaging filter window; 0 disables the filter.
    pub average_window: u32,
    /// Median filter rank; 0 disables the filter.
    pub median_rank: u32,
    /// Perform zero correction before selecting the range.
    pub zero_correct: bool,
    /// Communication timeout for every later call.
    pub io_timeout: Duration,
}

/// Capability: Current Measurement
///
/// Electrometers and picoammeters that timestamp their own samples.
///
/// # Contract
/// - `configure()` resets the instrument to defaults and applies the settings
///   (current function, zero correction, range, integration time, filters,
///   `timestamp, reading` data elements). A rejected setting is an error.
/// - `reset_clock()` zeroes the relative timestamp clock.
/// - `read_latest()` returns the most recent sample with its relative
///   timestamp. Timestamps come from the instrument, never from the host.
#[async_trait]
pub trait CurrentSensor: Send + Sync {
    /// Apply measurement settings.
    ///
    /// # Returns
    /// - Ok(()) if every setting was accepted
    /// - Err if the instrument rejected a setting or did not respond
    async fn configure(&self, settings: &ElectrometerSettings) -> Result<()>;

    /// Reset the relative timestamp clock to zero.
    async fn reset_clock(&self) -> Result<()>;

    /// Fetch the latest sample.
    ///
    /// # Returns
    /// - Ok(reading) with current in amperes and timestamp in seconds
    /// - Err on timeout or malformed response
    async fn read_latest(&self) -> Result<CurrentReading>;
}

/// Capability: Programmable Voltage Output
///
/// Bench supplies driven in constant-voltage mode.
///
/// # Contract
/// - Voltages in volts, currents in amperes
/// - `set_voltage` takes effect asynchronously on the hardware; a read-back
///   right after may still report the previous value
/// - `get_voltage` / `get_current` report the actual output, not the setpoint
#[async_trait]
pub trait VoltageSource: Send + Sync {
    /// Enable or disable the output stage.
    async fn set_output_enabled(&self, enabled: bool) -> Result<()>;

    /// Set the output current limit.
    async fn set_current_limit(&self, amps: f64) -> Result<()>;

    /// Set the output voltage.
    async fn set_voltage(&self, volts: f64) -> Result<()>;

    /// Read back the actual output voltage.
    async fn get_voltage(&self) -> Result<f64>;

    /// Read back the actual output current.
    async fn get_current(&self) -> Result<f64>;
}

/// Capability: Temperature Readout
///
/// Multi-channel temperature transmitters (fibre-optic, thermocouple).
#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Read the temperature of one channel in degrees Celsius.
    ///
    /// # Returns
    /// - Ok(value) on success
    /// - Err for an unknown channel or a communication failure
    async fn read_channel(&self, channel: &str) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoSupply {
        volts: Mutex<f64>,
    }

    #[async_trait]
    impl VoltageSource for EchoSupply {
        async fn set_output_enabled(&self, _enabled: bool) -> Result<()> {
            Ok(())
        }

        async fn set_current_limit(&self, _amps: f64) -> Result<()> {
            Ok(())
        }

        async fn set_voltage(&self, volts: f64) -> Result<()> {
            *self.volts.lock().unwrap() = volts;
            Ok(())
        }

        async fn get_voltage(&self) -> Result<f64> {
            Ok(*self.volts.lock().unwrap())
        }

        async fn get_current(&self) -> Result<f64> {
            Ok(*self.volts.lock().unwrap() / 100.0)
        }
    }

    #[tokio::test]
    async fn test_voltage_source_trait_object() {
        let supply: Box<dyn VoltageSource> = Box::new(EchoSupply {
            volts: Mutex::new(0.0),
        });

        supply.set_voltage(12.5).await.unwrap();
        assert_eq!(supply.get_voltage().await.unwrap(), 12.5);
        assert_eq!(supply.get_current().await.unwrap(), 0.125);
    }

    struct FixedThermometer;

    #[async_trait]
    impl TemperatureSensor for FixedThermometer {
        async fn read_channel(&self, channel: &str) -> Result<f64> {
            match channel {
                "A" => Ok(21.5),
                other => anyhow::bail!("no channel {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_temperature_sensor_trait() {
        let sensor = FixedThermometer;
        assert_eq!(sensor.read_channel("A").await.unwrap(), 21.5);
        assert!(sensor.read_channel("Z").await.is_err());
    }
}
