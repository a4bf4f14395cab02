//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent way to report the
//! failures that can end a measurement run, from rejected configurations to
//! instrument I/O problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the TOML file or `ME_DAQ_` environment variables.
//! - **`Configuration`**: Semantic errors in a run configuration that parsed fine
//!   but is logically invalid (e.g. an amplitude above the voltage ceiling).
//! - **`SafetyViolation`**: A computed setpoint exceeded the voltage ceiling. The
//!   setpoint is never sent to the supply.
//! - **`Instrument`**: Any communication failure reported by one of the three
//!   instruments, tagged with the instrument role and the operation that failed.
//! - **`Storage`** / **`Io`**: Export failures.
//! - **`ShutdownFailed`**: The run itself finished, but putting the supply back
//!   into its safe state did not.
//!
//! Every variant is fatal to the run in progress; there is no retry path.

use crate::instrument::InstrumentRole;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors that terminate a measurement run or an export.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation, or an instrument rejected it.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A setpoint above the ceiling was computed.
    #[error("Safety violation: setpoint {setpoint} V exceeds ceiling {ceiling} V")]
    SafetyViolation {
        /// The rejected setpoint in volts.
        setpoint: f64,
        /// The ceiling in force for the run, in volts.
        ceiling: f64,
    },

    /// An instrument call failed.
    #[error("Instrument error ({role}, {operation}): {source:#}")]
    Instrument {
        /// Which of the three instruments failed.
        role: InstrumentRole,
        /// Capability operation that failed.
        operation: &'static str,
        /// Underlying driver error.
        #[source]
        source: anyhow::Error,
    },

    /// Writing the exported table failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feature was compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// The run was stopped on request before its duration elapsed.
    #[error("Run stopped: {0}")]
    Stopped(String),

    /// The measurement task panicked; shutdown still ran.
    #[error("Measurement run panicked: {0}")]
    RunPanicked(String),

    /// One or more shutdown steps failed after an otherwise successful run.
    #[error("Shutdown failed with errors: {}", join_errors(.0))]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Wrap a driver error with the role and operation that produced it.
    pub fn instrument(role: InstrumentRole, operation: &'static str, source: anyhow::Error) -> Self {
        DaqError::Instrument {
            role,
            operation,
            source,
        }
    }

    /// True for errors raised by the safety interlock.
    pub fn is_safety_violation(&self) -> bool {
        matches!(self, DaqError::SafetyViolation { .. })
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

fn join_errors(errors: &[DaqError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
