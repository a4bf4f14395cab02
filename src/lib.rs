//! # ME DAQ Core Library
//!
//! Acquisition core for magnetoelectric current-response measurements: a
//! square-wave voltage stimulus drives the sample while an electrometer reads
//! the resulting current and a transmitter logs temperature. Every loop
//! iteration produces one time-aligned record; the run ends after a configured
//! wall-clock duration and the table is exported as CSV.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (defaults, TOML file, `ME_DAQ_`
//!   environment) and the immutable `RunConfiguration`.
//! - **`error`**: The crate-wide `DaqError` enum.
//! - **`export`**: CSV writer for closed record tables, date-partitioned.
//! - **`instrument`**: Capability traits for the three instruments and
//!   simulated implementations.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`orchestrator`**: The measurement run state machine and loop.
//! - **`record`**: Per-iteration records and the table they form.
//! - **`safety`**: Over-voltage interlock.
//! - **`state`**: Run lifecycle states.
//! - **`summary`**: Post-run statistics.
//! - **`validation`**: Parameter validation helpers.
//! - **`waveform`**: Stimulus waveforms.

pub mod config;
pub mod error;
pub mod export;
pub mod instrument;
pub mod logging;
pub mod orchestrator;
pub mod record;
pub mod safety;
pub mod state;
pub mod summary;
pub mod validation;
pub mod waveform;

pub use error::{AppResult, DaqError};
pub use orchestrator::{AbortedRun, InstrumentSet, MeasurementOrchestrator};
pub use record::{RecordTable, SampleRecord};
