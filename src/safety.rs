//! Over-voltage interlock.
//!
//! Every setpoint passes through [`SafetyGuard::validate`] before it reaches the
//! supply, and the same ceiling is checked against the configured amplitude
//! before the run starts. A rejection is fatal to the run: the orchestrator does
//! not retry or clamp, it shuts the supply down.
//!
//! The module also holds the two pieces that get the supply back to 0 V when a
//! run does not end through its own finalization: [`SupplyReleaseGuard`] for a
//! run future that is dropped, and [`StopFlag`] for an operator stop request.

use crate::error::{AppResult, DaqError};
use crate::instrument::VoltageSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Hard limit for the stimulus supply, in volts. A configured ceiling may lower
/// it but never raise it.
pub const MAX_VOLTAGE_CEILING_V: f64 = 23.0;

/// Default ceiling for the stimulus supply, in volts.
pub const DEFAULT_VOLTAGE_CEILING_V: f64 = MAX_VOLTAGE_CEILING_V;

/// Validates setpoints against a fixed ceiling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyGuard {
    ceiling: f64,
}

impl SafetyGuard {
    /// Create a guard. The ceiling must be finite, positive and no higher than
    /// [`MAX_VOLTAGE_CEILING_V`].
    pub fn new(ceiling: f64) -> AppResult<Self> {
        if !ceiling.is_finite() || ceiling <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Voltage ceiling must be finite and positive, got {ceiling}"
            )));
        }
        if ceiling > MAX_VOLTAGE_CEILING_V {
            return Err(DaqError::Configuration(format!(
                "Voltage ceiling {ceiling} V is above the {MAX_VOLTAGE_CEILING_V} V hardware limit"
            )));
        }
        Ok(Self { ceiling })
    }

    /// The ceiling in volts.
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    /// Return `candidate` unchanged if `|candidate| <= ceiling`.
    ///
    /// NaN and infinite candidates are rejected.
    pub fn validate(&self, candidate: f64) -> AppResult<f64> {
        validate(candidate, self.ceiling)
    }

    /// Reject a configured amplitude the waveform could never legally reach.
    pub fn check_amplitude(&self, amplitude: f64) -> AppResult<()> {
        if !amplitude.is_finite() || amplitude.abs() > self.ceiling {
            return Err(DaqError::Configuration(format!(
                "Stimulus amplitude {amplitude} V exceeds the {} V ceiling",
                self.ceiling
            )));
        }
        Ok(())
    }
}

/// Free-function form of [`SafetyGuard::validate`].
pub fn validate(candidate: f64, ceiling: f64) -> AppResult<f64> {
    if candidate.is_finite() && candidate.abs() <= ceiling {
        Ok(candidate)
    } else {
        tracing::error!(setpoint = candidate, ceiling, "setpoint rejected by interlock");
        Err(DaqError::SafetyViolation {
            setpoint: candidate,
            ceiling,
        })
    }
}

/// Returns the supply to 0 V with its output off if dropped while armed.
///
/// The orchestrator arms one before touching the supply and dismisses it once
/// its own shutdown sequence has run. If the run future is dropped in between
/// (a timeout, a `select!` branch losing, an aborted task), `Drop` spawns the
/// same sequence on the current tokio runtime.
pub struct SupplyReleaseGuard {
    supply: Option<Arc<dyn VoltageSource>>,
}

impl SupplyReleaseGuard {
    /// Arm a guard for `supply`.
    pub fn arm(supply: Arc<dyn VoltageSource>) -> Self {
        Self {
            supply: Some(supply),
        }
    }

    /// Disarm without touching the supply.
    pub fn dismiss(mut self) {
        self.supply = None;
    }
}

impl Drop for SupplyReleaseGuard {
    fn drop(&mut self) {
        let Some(supply) = self.supply.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Run dropped before finalization, releasing supply");
                handle.spawn(async move {
                    if let Err(e) = supply.set_voltage(0.0).await {
                        tracing::error!(error = %e, "Release: failed to zero the supply");
                    }
                    if let Err(e) = supply.set_output_enabled(false).await {
                        tracing::error!(error = %e, "Release: failed to disable the supply output");
                    }
                });
            }
            Err(_) => {
                tracing::error!("Run dropped outside a tokio runtime, supply output may still be on");
            }
        }
    }
}

/// Cooperative stop request shared between a run and whoever may end it early.
///
/// The acquisition loop checks the flag before every iteration and ends with
/// [`DaqError::Stopped`], after which the normal shutdown and partial-table
/// path runs.
#[derive(Clone, Default)]
pub struct StopFlag {
    flag: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
}

impl StopFlag {
    /// Create an untriggered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn trigger(&self, reason: impl Into<String>) {
        if let Ok(mut r) = self.reason.write() {
            *r = Some(reason.into());
        }
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reason given with the stop request.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::sim::{SimPowerSupply, SupplyCommand};
    use std::time::Duration;

    #[test]
    fn accepts_values_within_ceiling_unchanged() {
        let guard = SafetyGuard::new(23.0).unwrap();
        for v in [0.0, 22.3, 23.0, -23.0, -0.001, 1e-9] {
            assert_eq!(guard.validate(v).unwrap(), v);
        }
    }

    #[test]
    fn rejects_values_above_ceiling_in_magnitude() {
        let guard = SafetyGuard::new(23.0).unwrap();
        for v in [23.0001, -23.0001, 100.0, f64::INFINITY, f64::NAN] {
            let err = guard.validate(v).unwrap_err();
            assert!(err.is_safety_violation(), "{v} gave {err}");
        }
    }

    #[test]
    fn amplitude_check_is_a_configuration_error() {
        let guard = SafetyGuard::new(DEFAULT_VOLTAGE_CEILING_V).unwrap();
        assert!(guard.check_amplitude(22.3).is_ok());
        assert!(guard.check_amplitude(23.0).is_ok());
        assert!(matches!(
            guard.check_amplitude(23.5),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn ceiling_must_be_positive() {
        assert!(SafetyGuard::new(0.0).is_err());
        assert!(SafetyGuard::new(-5.0).is_err());
        assert!(SafetyGuard::new(f64::NAN).is_err());
    }

    #[test]
    fn ceiling_cannot_exceed_hardware_limit() {
        assert!(SafetyGuard::new(MAX_VOLTAGE_CEILING_V).is_ok());
        assert!(SafetyGuard::new(10.0).is_ok());
        let err = SafetyGuard::new(100.0).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
        assert!(err.to_string().contains("hardware limit"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_armed_guard_releases_supply() {
        let supply = Arc::new(SimPowerSupply::new().with_latency(Duration::from_millis(10)));
        supply.set_output_enabled(true).await.unwrap();
        supply.set_voltage(22.3).await.unwrap();

        drop(SupplyReleaseGuard::arm(supply.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let commands = supply.commands().await;
        assert_eq!(
            &commands[commands.len() - 2..],
            &[SupplyCommand::SetVoltage(0.0), SupplyCommand::SetOutputEnabled(false)]
        );
        assert!(!supply.is_output_enabled().await);
    }

    #[tokio::test(start_paused = true)]
    async fn dismissed_guard_leaves_supply_alone() {
        let supply = Arc::new(SimPowerSupply::new());
        SupplyReleaseGuard::arm(supply.clone()).dismiss();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(supply.commands().await.is_empty());
    }

    #[test]
    fn stop_flag_is_shared_between_clones() {
        let flag = StopFlag::new();
        let remote = flag.clone();
        assert!(!flag.is_triggered());
        remote.trigger("operator");
        assert!(flag.is_triggered());
        assert_eq!(flag.reason().as_deref(), Some("operator"));
    }
}
