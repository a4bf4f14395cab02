//! Measurement orchestrator.
//!
//! Owns the run lifecycle: configure the three instruments, run the timed
//! acquisition loop, and always return the supply to its safe state.
//!
//! # Architecture
//!
//! ```text
//! RunConfiguration ─┐
//!                   ├─> MeasurementOrchestrator ──> RecordSink ──> RecordTable
//! InstrumentSet ────┘          │
//!                              └─> SafetyGuard ──> VoltageSource::set_voltage
//! ```
//!
//! # Iteration
//!
//! Each pass of the loop reads the electrometer, the thermometer and the supply's
//! actual output, computes the next setpoint from the electrometer timestamp,
//! appends one record, validates the setpoint and only then commands it. The
//! supply read-back in a record therefore reflects the setpoint commanded one
//! iteration earlier.
//!
//! # Shutdown
//!
//! `set_voltage(0)` followed by `set_output_enabled(false)` runs after every
//! run that got past `Idle`, including runs that fail during configuration and
//! runs whose loop panics. Shutdown steps are best effort: a failing step is
//! logged and the next one still runs. If the run future is dropped before it
//! finishes, a [`SupplyReleaseGuard`] spawns the same sequence. An operator
//! stop through [`StopFlag`] ends the loop early and takes the normal path.

use crate::config::RunConfiguration;
use crate::error::{AppResult, DaqError};
use crate::instrument::{CurrentSensor, InstrumentRole, TemperatureSensor, VoltageSource};
use crate::record::{DataIntegrityWarning, RecordSink, RecordTable, SampleRecord};
use crate::safety::{SafetyGuard, StopFlag, SupplyReleaseGuard};
use crate::state::RunState;
use crate::waveform::{round_to, SquareWave, Stimulus};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Handles to the three instruments a run drives.
///
/// Constructed by the caller and passed in; the orchestrator never builds its
/// own instruments.
#[derive(Clone)]
pub struct InstrumentSet {
    /// Electrometer
    pub current_sensor: Arc<dyn CurrentSensor>,
    /// Stimulus supply
    pub voltage_source: Arc<dyn VoltageSource>,
    /// Temperature transmitter
    pub temperature_sensor: Arc<dyn TemperatureSensor>,
}

/// Fatal outcome of a run.
///
/// Carries the records collected before the failure so they can still be
/// exported.
#[derive(Debug, Error)]
#[error("run aborted while {state_at_failure}: {error}")]
pub struct AbortedRun {
    /// The error that ended the run.
    #[source]
    pub error: DaqError,
    /// State the orchestrator was in when the error occurred.
    pub state_at_failure: RunState,
    /// Records appended before the failure.
    pub partial: RecordTable,
}

/// Drives one measurement run.
///
/// # Example
///
/// ```rust,ignore
/// let bench = SimBench::default();
/// let run = RunConfiguration::builder().duration(Duration::from_secs(5)).build()?;
/// let mut orchestrator = MeasurementOrchestrator::new(run, bench.instruments())?;
/// let table = orchestrator.run().await?;
/// ```
pub struct MeasurementOrchestrator {
    config: RunConfiguration,
    instruments: InstrumentSet,
    guard: SafetyGuard,
    stimulus: Box<dyn Stimulus>,
    stop: StopFlag,
    state: RunState,
}

impl MeasurementOrchestrator {
    /// Validate `config` and prepare a run with the square-wave stimulus it
    /// describes.
    pub fn new(config: RunConfiguration, instruments: InstrumentSet) -> AppResult<Self> {
        config.validate()?;
        let guard = config.safety_guard()?;
        let stimulus = Box::new(SquareWave {
            frequency: config.frequency_hz,
            amplitude: config.amplitude_v,
        });
        Ok(Self {
            config,
            instruments,
            guard,
            stimulus,
            stop: StopFlag::new(),
            state: RunState::Idle,
        })
    }

    /// Replace the stimulus waveform.
    ///
    /// The configured amplitude check does not apply to a custom stimulus;
    /// every setpoint it produces still passes the interlock.
    pub fn with_stimulus(mut self, stimulus: Box<dyn Stimulus>) -> Self {
        self.stimulus = stimulus;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The run configuration.
    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Handle that ends the acquisition loop before its duration elapses.
    ///
    /// Triggering it makes the run fail with [`DaqError::Stopped`] after the
    /// usual shutdown, with the records collected so far in the partial table.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Execute the run.
    ///
    /// Returns the closed table on success. On failure the [`AbortedRun`]
    /// carries the error, the state it happened in and the partial table. The
    /// shutdown sequence has run by the time either is returned.
    ///
    /// # Errors
    ///
    /// - Any instrument failure during configuration or acquisition
    /// - A setpoint rejected by the interlock
    /// - A panic inside the run (reported as [`DaqError::RunPanicked`])
    /// - A failed shutdown step after an otherwise successful run
    /// - Calling `run` on an orchestrator that already ran
    pub async fn run(&mut self) -> Result<RecordTable, AbortedRun> {
        if !self.state.can_begin() {
            return Err(AbortedRun {
                error: DaqError::Configuration(format!(
                    "Cannot start run: orchestrator in {} state (expected Idle)",
                    self.state
                )),
                state_at_failure: self.state,
                partial: RecordTable::default(),
            });
        }

        let span = info_span!("measurement_run", sample = %self.config.sample);
        self.execute().instrument(span).await
    }

    async fn execute(&mut self) -> Result<RecordTable, AbortedRun> {
        info!(
            duration = ?self.config.duration,
            stimulus = %self.stimulus.describe(),
            ceiling_v = self.guard.ceiling(),
            "Starting measurement run"
        );

        let mut sink = RecordSink::new();
        let release = SupplyReleaseGuard::arm(self.instruments.voltage_source.clone());
        let outcome = AssertUnwindSafe(self.configure_and_acquire(&mut sink))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(%message, "Measurement run panicked");
                Some(DaqError::RunPanicked(message))
            }
        };

        let state_at_failure = self.state;
        if let Some(err) = &failure {
            error!(state = %state_at_failure, error = %err, "Run aborted");
            self.transition(RunState::Aborted);
        }

        self.transition(RunState::Finalizing);
        let shutdown_errors = self.shutdown().await;
        release.dismiss();
        if sink.is_empty() {
            warn!("Run produced no records");
        }
        let partial = sink.close();

        match failure {
            Some(error) => {
                if !shutdown_errors.is_empty() {
                    error!(
                        count = shutdown_errors.len(),
                        "Shutdown after abort also failed"
                    );
                }
                self.transition(RunState::Aborted);
                Err(AbortedRun {
                    error,
                    state_at_failure,
                    partial,
                })
            }
            None if !shutdown_errors.is_empty() => {
                self.transition(RunState::Aborted);
                Err(AbortedRun {
                    error: DaqError::ShutdownFailed(shutdown_errors),
                    state_at_failure: RunState::Finalizing,
                    partial,
                })
            }
            None => {
                self.transition(RunState::Done);
                info!(
                    records = partial.len(),
                    warnings = partial.warnings().len(),
                    "Measurement run complete"
                );
                Ok(partial)
            }
        }
    }

    async fn configure_and_acquire(&mut self, sink: &mut RecordSink) -> AppResult<()> {
        self.transition(RunState::Configuring);
        self.configure().await?;
        self.transition(RunState::Running);
        self.acquire(sink).await
    }

    /// Setup order: supply output on, current limit, 0 V; electrometer
    /// settings; electrometer clock reset last so `t = 0` is the loop start.
    async fn configure(&self) -> AppResult<()> {
        let supply = &self.instruments.voltage_source;
        supply
            .set_output_enabled(true)
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::VoltageSource, "set_output_enabled", e))?;
        supply
            .set_current_limit(self.config.current_limit_a)
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::VoltageSource, "set_current_limit", e))?;
        self.command_voltage(0.0).await?;

        let settings = self.config.electrometer_settings();
        let sensor = &self.instruments.current_sensor;
        sensor
            .configure(&settings)
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::CurrentSensor, "configure", e))?;
        sensor
            .reset_clock()
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::CurrentSensor, "reset_clock", e))?;

        info!(
            range_a = settings.range_a,
            nplc = settings.nplc,
            current_limit_a = self.config.current_limit_a,
            "Instruments configured"
        );
        Ok(())
    }

    async fn acquire(&self, sink: &mut RecordSink) -> AppResult<()> {
        let start = Instant::now();
        while start.elapsed() <= self.config.duration {
            if self.stop.is_triggered() {
                let reason = self.stop.reason().unwrap_or_else(|| "stop requested".to_string());
                info!(%reason, records = sink.len(), "Stop requested, leaving acquisition loop");
                return Err(DaqError::Stopped(reason));
            }
            self.iterate(sink).await?;
        }
        info!(records = sink.len(), elapsed = ?start.elapsed(), "Acquisition loop finished");
        Ok(())
    }

    async fn iterate(&self, sink: &mut RecordSink) -> AppResult<()> {
        let reading = self
            .instruments
            .current_sensor
            .read_latest()
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::CurrentSensor, "read_latest", e))?;
        let temperature = self
            .instruments
            .temperature_sensor
            .read_channel(&self.config.temperature_channel)
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::TemperatureSensor, "read_channel", e))?;
        let supply = &self.instruments.voltage_source;
        let applied_voltage = supply
            .get_voltage()
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::VoltageSource, "get_voltage", e))?;
        let applied_current = supply
            .get_current()
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::VoltageSource, "get_current", e))?;

        if !reading.relative_timestamp.is_finite() {
            return Err(DaqError::instrument(
                InstrumentRole::CurrentSensor,
                "read_latest",
                anyhow::anyhow!("non-finite timestamp {}", reading.relative_timestamp),
            ));
        }

        let target = self.stimulus.voltage_at(reading.relative_timestamp);

        if let Some(previous) = sink.last() {
            if reading.relative_timestamp <= previous.relative_timestamp {
                let warning = DataIntegrityWarning::NonMonotonicTimestamp {
                    index: sink.len(),
                    previous: previous.relative_timestamp,
                    current: reading.relative_timestamp,
                };
                warn!(%warning, "Data integrity warning");
                sink.note(warning);
            }
        }

        let record = SampleRecord {
            relative_timestamp: reading.relative_timestamp,
            measured_current: reading.current,
            measured_temperature: round_to(temperature, 3),
            target_voltage: round_to(target, 3),
            applied_voltage,
            applied_current,
        };
        debug!(
            time = record.relative_timestamp,
            current = record.measured_current,
            temp = record.measured_temperature,
            target_v = record.target_voltage,
            volt = record.applied_voltage,
            curr = record.applied_current,
            "record"
        );
        sink.append(record);

        self.command_voltage(target).await
    }

    /// The only path to `set_voltage` outside shutdown.
    async fn command_voltage(&self, volts: f64) -> AppResult<()> {
        let volts = self.guard.validate(volts)?;
        self.instruments
            .voltage_source
            .set_voltage(volts)
            .await
            .map_err(|e| DaqError::instrument(InstrumentRole::VoltageSource, "set_voltage", e))
    }

    async fn shutdown(&self) -> Vec<DaqError> {
        let supply = &self.instruments.voltage_source;
        let mut errors = Vec::new();

        if let Err(e) = supply.set_voltage(0.0).await {
            let err = DaqError::instrument(InstrumentRole::VoltageSource, "set_voltage", e);
            error!(error = %err, "Shutdown: failed to zero the supply");
            errors.push(err);
        }
        if let Err(e) = supply.set_output_enabled(false).await {
            let err = DaqError::instrument(InstrumentRole::VoltageSource, "set_output_enabled", e);
            error!(error = %err, "Shutdown: failed to disable the supply output");
            errors.push(err);
        }

        if errors.is_empty() {
            info!("Supply returned to safe state");
        }
        errors
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        info!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::sim::{SimBench, SimElectrometer, SimPowerSupply, SimThermometer, SupplyCommand};
    use crate::instrument::CurrentReading;
    use async_trait::async_trait;
    use std::time::Duration;

    fn bench() -> SimBench {
        SimBench::new(
            SimPowerSupply::new().with_latency(Duration::from_millis(10)),
            |supply| {
                SimElectrometer::wired_to(supply)
                    .with_latency(Duration::from_secs(1))
                    .with_tick(Duration::from_secs(1))
            },
            SimThermometer::new(25.0).with_latency(Duration::from_millis(10)),
        )
    }

    fn run_config(secs: u64) -> RunConfiguration {
        RunConfiguration::builder()
            .sample("unit")
            .duration(Duration::from_secs(secs))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reaches_done() {
        let bench = bench();
        let mut orchestrator = MeasurementOrchestrator::new(run_config(5), bench.instruments()).unwrap();
        assert_eq!(orchestrator.state(), RunState::Idle);

        let table = orchestrator.run().await.unwrap();
        assert_eq!(orchestrator.state(), RunState::Done);
        assert_eq!(table.len(), 5);
        assert!(!bench.supply.is_output_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_rejected() {
        let bench = bench();
        let mut orchestrator = MeasurementOrchestrator::new(run_config(1), bench.instruments()).unwrap();
        orchestrator.run().await.unwrap();
        let commands = bench.supply.commands().await.len();

        let aborted = orchestrator.run().await.unwrap_err();
        assert!(matches!(aborted.error, DaqError::Configuration(_)));
        assert_eq!(aborted.state_at_failure, RunState::Done);
        assert_eq!(bench.supply.commands().await.len(), commands);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_stimulus_above_ceiling_aborts_before_command() {
        struct Overdrive;
        impl Stimulus for Overdrive {
            fn voltage_at(&self, _elapsed: f64) -> f64 {
                30.0
            }
            fn describe(&self) -> String {
                "constant 30 V".to_string()
            }
        }

        let bench = bench();
        let mut orchestrator = MeasurementOrchestrator::new(run_config(5), bench.instruments())
            .unwrap()
            .with_stimulus(Box::new(Overdrive));

        let aborted = orchestrator.run().await.unwrap_err();
        assert!(aborted.error.is_safety_violation());
        assert_eq!(aborted.state_at_failure, RunState::Running);
        assert_eq!(aborted.partial.len(), 1);
        assert_eq!(orchestrator.state(), RunState::Aborted);
        let commands = bench.supply.commands().await;
        assert!(!commands.contains(&SupplyCommand::SetVoltage(30.0)));
        assert_eq!(
            &commands[commands.len() - 2..],
            &[SupplyCommand::SetVoltage(0.0), SupplyCommand::SetOutputEnabled(false)]
        );
        assert!(!bench.supply.is_output_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flag_ends_run_with_partial_table() {
        let bench = bench();
        let mut orchestrator = MeasurementOrchestrator::new(run_config(60), bench.instruments()).unwrap();
        let stop = orchestrator.stop_flag();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3500)).await;
            stop.trigger("operator interrupt");
        });

        let aborted = orchestrator.run().await.unwrap_err();

        match &aborted.error {
            DaqError::Stopped(reason) => assert_eq!(reason, "operator interrupt"),
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(aborted.state_at_failure, RunState::Running);
        // Setup ends at 1.03 s and iterations start at 1.03, 2.07 and 3.11 s;
        // the flag is seen before the fourth.
        assert_eq!(aborted.partial.len(), 3);
        assert_eq!(orchestrator.state(), RunState::Aborted);
        let commands = bench.supply.commands().await;
        assert_eq!(
            &commands[commands.len() - 2..],
            &[SupplyCommand::SetVoltage(0.0), SupplyCommand::SetOutputEnabled(false)]
        );
    }

    struct PanickingSensor;

    #[async_trait]
    impl CurrentSensor for PanickingSensor {
        async fn configure(&self, _settings: &crate::instrument::ElectrometerSettings) -> anyhow::Result<()> {
            Ok(())
        }
        async fn reset_clock(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn read_latest(&self) -> anyhow::Result<CurrentReading> {
            panic!("driver bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_still_runs_shutdown() {
        let bench = bench();
        let mut instruments = bench.instruments();
        instruments.current_sensor = Arc::new(PanickingSensor);

        let mut orchestrator = MeasurementOrchestrator::new(run_config(5), instruments).unwrap();
        let aborted = orchestrator.run().await.unwrap_err();

        match &aborted.error {
            DaqError::RunPanicked(message) => assert!(message.contains("driver bug")),
            other => panic!("unexpected error {other}"),
        }
        let commands = bench.supply.commands().await;
        assert_eq!(
            &commands[commands.len() - 2..],
            &[SupplyCommand::SetVoltage(0.0), SupplyCommand::SetOutputEnabled(false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_failure_after_clean_run() {
        // Set-voltage calls: 1 during setup, 5 in the loop, the 7th is shutdown.
        let bench = SimBench::new(
            SimPowerSupply::new()
                .with_latency(Duration::from_millis(10))
                .fail_set_voltage_on(7),
            |supply| {
                SimElectrometer::wired_to(supply)
                    .with_latency(Duration::from_secs(1))
                    .with_tick(Duration::from_secs(1))
            },
            SimThermometer::new(25.0).with_latency(Duration::from_millis(10)),
        );
        let mut orchestrator = MeasurementOrchestrator::new(run_config(5), bench.instruments()).unwrap();

        let aborted = orchestrator.run().await.unwrap_err();
        assert!(matches!(aborted.error, DaqError::ShutdownFailed(ref errors) if errors.len() == 1));
        assert_eq!(aborted.state_at_failure, RunState::Finalizing);
        assert_eq!(aborted.partial.len(), 5);
        // The output-disable step still ran.
        assert!(!bench.supply.is_output_enabled().await);
    }

    struct ScriptedSensor {
        stamps: Vec<f64>,
        reads: std::sync::Mutex<usize>,
    }

    #[async_trait]
    impl CurrentSensor for ScriptedSensor {
        async fn configure(&self, _settings: &crate::instrument::ElectrometerSettings) -> anyhow::Result<()> {
            Ok(())
        }
        async fn reset_clock(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn read_latest(&self) -> anyhow::Result<CurrentReading> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let index = {
                let mut reads = self.reads.lock().unwrap();
                *reads += 1;
                *reads - 1
            };
            Ok(CurrentReading {
                current: 1e-9,
                relative_timestamp: self.stamps[index.min(self.stamps.len() - 1)],
            })
        }
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_non_monotonic_timestamp_is_flagged_not_fatal() {
        let bench = bench();
        let mut instruments = bench.instruments();
        instruments.current_sensor = Arc::new(ScriptedSensor {
            stamps: vec![0.0, 1.0, 0.5],
            reads: std::sync::Mutex::new(0),
        });

        let mut orchestrator = MeasurementOrchestrator::new(run_config(3), instruments).unwrap();
        let table = orchestrator.run().await.unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.warnings(),
            &[DataIntegrityWarning::NonMonotonicTimestamp {
                index: 2,
                previous: 1.0,
                current: 0.5,
            }]
        );
        assert!(logs_contain("Data integrity warning"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nan_timestamp_aborts_before_command() {
        let bench = bench();
        let mut instruments = bench.instruments();
        instruments.current_sensor = Arc::new(ScriptedSensor {
            stamps: vec![0.0, f64::NAN],
            reads: std::sync::Mutex::new(0),
        });

        let mut orchestrator = MeasurementOrchestrator::new(run_config(5), instruments).unwrap();
        let aborted = orchestrator.run().await.unwrap_err();

        assert_eq!(aborted.state_at_failure, RunState::Running);
        assert_eq!(aborted.partial.len(), 1);
        match &aborted.error {
            DaqError::Instrument { operation, source, .. } => {
                assert_eq!(*operation, "read_latest");
                assert!(source.to_string().contains("non-finite timestamp"));
            }
            other => panic!("unexpected error {other}"),
        }
        // Setup 0 V, one loop command at the first target, then shutdown.
        let commands = bench.supply.commands().await;
        assert_eq!(
            commands,
            vec![
                SupplyCommand::SetOutputEnabled(true),
                SupplyCommand::SetCurrentLimit(20.0),
                SupplyCommand::SetVoltage(0.0),
                SupplyCommand::SetVoltage(0.0),
                SupplyCommand::SetVoltage(0.0),
                SupplyCommand::SetOutputEnabled(false),
            ]
        );
    }

    #[test]
    fn test_panic_message_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic payload");
    }
}
