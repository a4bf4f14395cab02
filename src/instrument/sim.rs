//! Simulated Instruments
//!
//! Provides simulated devices for testing and dry runs without physical hardware.
//! All simulated devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep), so tests can run them under paused tokio time.
//!
//! # Available Simulations
//!
//! - `SimElectrometer` - Current sensor with its own relative clock
//! - `SimPowerSupply` - Voltage source that echoes its last setpoint
//! - `SimThermometer` - Four-channel temperature transmitter
//! - `SimBench` - The three devices wired together
//!
//! # Performance Characteristics
//!
//! - SimElectrometer: 50ms per read (about 1 NPLC plus serial transfer)
//! - SimPowerSupply: 5ms per command or query
//! - SimThermometer: 20ms per read

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use crate::instrument::capabilities::{
    CurrentReading, CurrentSensor, ElectrometerSettings, TemperatureSensor, VoltageSource,
};
use crate::orchestrator::InstrumentSet;

/// Lowest selectable current range (A).
pub const MIN_CURRENT_RANGE_A: f64 = 20e-12;
/// Highest selectable current range (A).
pub const MAX_CURRENT_RANGE_A: f64 = 20e-3;

// =============================================================================
// SimPowerSupply - Simulated Voltage Source
// =============================================================================

/// One command received by a [`SimPowerSupply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupplyCommand {
    /// `set_output_enabled`
    SetOutputEnabled(bool),
    /// `set_current_limit`
    SetCurrentLimit(f64),
    /// `set_voltage`
    SetVoltage(f64),
}

#[derive(Debug)]
struct SupplyState {
    setpoint: f64,
    output_enabled: bool,
    current_limit: f64,
    set_voltage_calls: usize,
    commands: Vec<SupplyCommand>,
}

/// Simulated bench supply.
///
/// Simulates a supply with:
/// - Output that follows the last setpoint immediately while enabled
/// - Resistive load (current = V / load, capped at the current limit)
/// - A log of every command, for asserting shutdown sequences
///
/// # Example
///
/// ```rust,ignore
/// let supply = SimPowerSupply::new();
/// supply.set_output_enabled(true).await?;
/// supply.set_voltage(5.0).await?;
/// assert_eq!(supply.get_voltage().await?, 5.0);
/// ```
pub struct SimPowerSupply {
    state: Mutex<SupplyState>,
    load_ohms: f64,
    latency: Duration,
    fail_set_voltage_on: Option<usize>,
}

impl SimPowerSupply {
    /// Create a supply with a 1 MΩ load and 5ms latency.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SupplyState {
                setpoint: 0.0,
                output_enabled: false,
                current_limit: 0.0,
                set_voltage_calls: 0,
                commands: Vec::new(),
            }),
            load_ohms: 1.0e6,
            latency: Duration::from_millis(5),
            fail_set_voltage_on: None,
        }
    }

    /// Set the per-call latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the resistive load in ohms.
    pub fn with_load(mut self, ohms: f64) -> Self {
        self.load_ohms = ohms;
        self
    }

    /// Make the n-th `set_voltage` call (1-based) fail.
    pub fn fail_set_voltage_on(mut self, call: usize) -> Self {
        self.fail_set_voltage_on = Some(call);
        self
    }

    /// All commands received so far, in order.
    pub async fn commands(&self) -> Vec<SupplyCommand> {
        self.state.lock().await.commands.clone()
    }

    /// Whether the output stage is currently enabled.
    pub async fn is_output_enabled(&self) -> bool {
        self.state.lock().await.output_enabled
    }

    /// Voltage present at the output terminals.
    pub async fn output_voltage(&self) -> f64 {
        let state = self.state.lock().await;
        if state.output_enabled {
            state.setpoint
        } else {
            0.0
        }
    }
}

impl Default for SimPowerSupply {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoltageSource for SimPowerSupply {
    async fn set_output_enabled(&self, enabled: bool) -> Result<()> {
        sleep(self.latency).await;
        let mut state = self.state.lock().await;
        state.output_enabled = enabled;
        state.commands.push(SupplyCommand::SetOutputEnabled(enabled));
        tracing::trace!(enabled, "SimPowerSupply: output");
        Ok(())
    }

    async fn set_current_limit(&self, amps: f64) -> Result<()> {
        sleep(self.latency).await;
        if amps <= 0.0 {
            return Err(anyhow!("SimPowerSupply: current limit must be positive"));
        }
        let mut state = self.state.lock().await;
        state.current_limit = amps;
        state.commands.push(SupplyCommand::SetCurrentLimit(amps));
        Ok(())
    }

    async fn set_voltage(&self, volts: f64) -> Result<()> {
        sleep(self.latency).await;
        let mut state = self.state.lock().await;
        state.set_voltage_calls += 1;
        if self.fail_set_voltage_on == Some(state.set_voltage_calls) {
            bail!(
                "SimPowerSupply: injected failure on set_voltage call {}",
                state.set_voltage_calls
            );
        }
        state.setpoint = volts;
        state.commands.push(SupplyCommand::SetVoltage(volts));
        tracing::trace!(volts, "SimPowerSupply: setpoint");
        Ok(())
    }

    async fn get_voltage(&self) -> Result<f64> {
        sleep(self.latency).await;
        Ok(self.output_voltage().await)
    }

    async fn get_current(&self) -> Result<f64> {
        sleep(self.latency).await;
        let state = self.state.lock().await;
        if !state.output_enabled {
            return Ok(0.0);
        }
        let amps = state.setpoint / self.load_ohms;
        Ok(amps.clamp(-state.current_limit, state.current_limit))
    }
}

// =============================================================================
// SimElectrometer - Simulated Current Sensor
// =============================================================================

#[derive(Debug)]
struct ElectrometerState {
    settings: Option<ElectrometerSettings>,
    clock_origin: Instant,
    ticks: u64,
    reads: usize,
}

/// Simulated electrometer.
///
/// The measured current is `offset + conductance * V`, where `V` is the output
/// of the supply the electrometer is wired to (0 V when unwired). The relative
/// clock is either real elapsed tokio time since the last reset, or a fake
/// clock that advances by a fixed tick on every read (`with_tick`).
pub struct SimElectrometer {
    state: Mutex<ElectrometerState>,
    supply: Option<Arc<SimPowerSupply>>,
    conductance_s: f64,
    offset_a: f64,
    latency: Duration,
    tick: Option<Duration>,
    fail_on_read: Option<usize>,
}

impl SimElectrometer {
    /// Create an unwired electrometer with a 50ms read latency.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ElectrometerState {
                settings: None,
                clock_origin: Instant::now(),
                ticks: 0,
                reads: 0,
            }),
            supply: None,
            conductance_s: 1.0e-10,
            offset_a: 5.0e-12,
            latency: Duration::from_millis(50),
            tick: None,
            fail_on_read: None,
        }
    }

    /// Create an electrometer measuring the sample driven by `supply`.
    pub fn wired_to(supply: Arc<SimPowerSupply>) -> Self {
        Self {
            supply: Some(supply),
            ..Self::new()
        }
    }

    /// Set the per-read latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Use a fake relative clock that advances by `tick` per read.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = Some(tick);
        self
    }

    /// Set the sample model `offset + conductance * V`.
    pub fn with_response(mut self, conductance_s: f64, offset_a: f64) -> Self {
        self.conductance_s = conductance_s;
        self.offset_a = offset_a;
        self
    }

    /// Make the n-th `read_latest` call (1-based) fail.
    pub fn fail_on_read(mut self, read: usize) -> Self {
        self.fail_on_read = Some(read);
        self
    }

    /// Number of `read_latest` calls so far, failed ones included.
    pub async fn read_count(&self) -> usize {
        self.state.lock().await.reads
    }

    /// Settings applied by the last successful `configure`.
    pub async fn settings(&self) -> Option<ElectrometerSettings> {
        self.state.lock().await.settings.clone()
    }
}

impl Default for SimElectrometer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CurrentSensor for SimElectrometer {
    async fn configure(&self, settings: &ElectrometerSettings) -> Result<()> {
        sleep(self.latency).await;
        if !(MIN_CURRENT_RANGE_A..=MAX_CURRENT_RANGE_A).contains(&settings.range_a) {
            bail!(
                "SimElectrometer: range {:e} A rejected (valid {:e}..={:e})",
                settings.range_a,
                MIN_CURRENT_RANGE_A,
                MAX_CURRENT_RANGE_A
            );
        }
        if !(0.01..=10.0).contains(&settings.nplc) {
            bail!("SimElectrometer: NPLC {} rejected", settings.nplc);
        }
        self.state.lock().await.settings = Some(settings.clone());
        tracing::debug!(range_a = settings.range_a, nplc = settings.nplc, "SimElectrometer: configured");
        Ok(())
    }

    async fn reset_clock(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.clock_origin = Instant::now();
        state.ticks = 0;
        Ok(())
    }

    async fn read_latest(&self) -> Result<CurrentReading> {
        let relative_timestamp = {
            let mut state = self.state.lock().await;
            state.reads += 1;
            if self.fail_on_read == Some(state.reads) {
                bail!("SimElectrometer: injected failure on read {}", state.reads);
            }
            if state.settings.is_none() {
                bail!("SimElectrometer: read before configure");
            }
            match self.tick {
                Some(tick) => {
                    let stamp = tick.as_secs_f64() * state.ticks as f64;
                    state.ticks += 1;
                    stamp
                }
                None => state.clock_origin.elapsed().as_secs_f64(),
            }
        };

        let volts = match &self.supply {
            Some(supply) => supply.output_voltage().await,
            None => 0.0,
        };
        sleep(self.latency).await;

        Ok(CurrentReading {
            current: self.offset_a + self.conductance_s * volts,
            relative_timestamp,
        })
    }
}

// =============================================================================
// SimThermometer - Simulated Temperature Sensor
// =============================================================================

/// Channels available on the simulated transmitter.
pub const THERMOMETER_CHANNELS: [&str; 4] = ["A", "B", "C", "D"];

/// Simulated four-channel temperature transmitter.
///
/// Every channel reports the same temperature, which changes by a fixed drift
/// per read.
pub struct SimThermometer {
    temperature: Mutex<f64>,
    drift_per_read: f64,
    latency: Duration,
}

impl SimThermometer {
    /// Create a transmitter reading `celsius` with no drift and 20ms latency.
    pub fn new(celsius: f64) -> Self {
        Self {
            temperature: Mutex::new(celsius),
            drift_per_read: 0.0,
            latency: Duration::from_millis(20),
        }
    }

    /// Add a linear drift per read.
    pub fn with_drift(mut self, per_read: f64) -> Self {
        self.drift_per_read = per_read;
        self
    }

    /// Set the per-read latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl Default for SimThermometer {
    fn default() -> Self {
        Self::new(25.0)
    }
}

#[async_trait]
impl TemperatureSensor for SimThermometer {
    async fn read_channel(&self, channel: &str) -> Result<f64> {
        sleep(self.latency).await;
        if !THERMOMETER_CHANNELS.contains(&channel) {
            bail!("SimThermometer: unknown channel '{}'", channel);
        }
        let mut temperature = self.temperature.lock().await;
        let reading = *temperature;
        *temperature += self.drift_per_read;
        Ok(reading)
    }
}

// =============================================================================
// SimBench - Wired Simulation
// =============================================================================

/// The three simulated instruments wired together.
///
/// Fields stay public so tests can keep a handle for inspection after the
/// instruments are handed to the orchestrator.
pub struct SimBench {
    /// Simulated electrometer, wired to `supply`.
    pub electrometer: Arc<SimElectrometer>,
    /// Simulated supply.
    pub supply: Arc<SimPowerSupply>,
    /// Simulated transmitter.
    pub thermometer: Arc<SimThermometer>,
}

impl SimBench {
    /// Wire a bench from a supply and a function building the electrometer.
    pub fn new(
        supply: SimPowerSupply,
        electrometer: impl FnOnce(Arc<SimPowerSupply>) -> SimElectrometer,
        thermometer: SimThermometer,
    ) -> Self {
        let supply = Arc::new(supply);
        let electrometer = Arc::new(electrometer(Arc::clone(&supply)));
        Self {
            electrometer,
            supply,
            thermometer: Arc::new(thermometer),
        }
    }

    /// Instrument handles for the orchestrator.
    pub fn instruments(&self) -> InstrumentSet {
        InstrumentSet {
            current_sensor: self.electrometer.clone(),
            voltage_source: self.supply.clone(),
            temperature_sensor: self.thermometer.clone(),
        }
    }
}

impl Default for SimBench {
    fn default() -> Self {
        Self::new(
            SimPowerSupply::new(),
            SimElectrometer::wired_to,
            SimThermometer::default(),
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
