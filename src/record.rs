//! Per-iteration records and the in-memory table they accumulate into.
//!
//! The table's column names and order are read by downstream analysis tools and
//! must not change: `time, current, osensa_temp, cpx_target_voltage, cpx_volt,
//! cpx_curr`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output columns, in export order.
pub const COLUMNS: [&str; 6] = [
    "time",
    "current",
    "osensa_temp",
    "cpx_target_voltage",
    "cpx_volt",
    "cpx_curr",
];

/// One synchronized snapshot of a loop iteration.
///
/// Field order matches [`COLUMNS`]; serde names are the column names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Seconds on the electrometer's relative clock.
    #[serde(rename = "time")]
    pub relative_timestamp: f64,
    /// Sample current in amperes.
    #[serde(rename = "current")]
    pub measured_current: f64,
    /// Temperature in degrees Celsius, rounded to 3 decimals.
    #[serde(rename = "osensa_temp")]
    pub measured_temperature: f64,
    /// Setpoint computed from this record's timestamp, rounded to 3 decimals.
    ///
    /// This is the setpoint commanded at the end of the iteration, so it leads
    /// `cpx_volt` by one row. Tables written by the earlier acquisition script
    /// stored the previously commanded target here, starting at 0; analysis
    /// code written against those files sees this column shifted up by one row.
    #[serde(rename = "cpx_target_voltage")]
    pub target_voltage: f64,
    /// Supply output voltage read back this iteration.
    #[serde(rename = "cpx_volt")]
    pub applied_voltage: f64,
    /// Supply output current read back this iteration.
    #[serde(rename = "cpx_curr")]
    pub applied_current: f64,
}

impl SampleRecord {
    /// Values in [`COLUMNS`] order.
    pub fn values(&self) -> [f64; 6] {
        [
            self.relative_timestamp,
            self.measured_current,
            self.measured_temperature,
            self.target_voltage,
            self.applied_voltage,
            self.applied_current,
        ]
    }
}

/// Non-fatal data problem noticed while recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DataIntegrityWarning {
    /// A timestamp did not increase over the previous record's.
    NonMonotonicTimestamp {
        /// Row index of the offending record.
        index: usize,
        /// Previous record's timestamp.
        previous: f64,
        /// Offending timestamp.
        current: f64,
    },
}

impl fmt::Display for DataIntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataIntegrityWarning::NonMonotonicTimestamp {
                index,
                previous,
                current,
            } => write!(
                f,
                "row {index}: timestamp {current} s does not follow {previous} s"
            ),
        }
    }
}

/// Append-only accumulator owned by the orchestrator during a run.
#[derive(Debug, Default)]
pub struct RecordSink {
    records: Vec<SampleRecord>,
    warnings: Vec<DataIntegrityWarning>,
}

impl RecordSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. No validation happens here.
    pub fn append(&mut self, record: SampleRecord) {
        self.records.push(record);
    }

    /// Attach a warning to the table.
    pub fn note(&mut self, warning: DataIntegrityWarning) {
        self.warnings.push(warning);
    }

    /// The most recently appended record.
    pub fn last(&self) -> Option<&SampleRecord> {
        self.records.last()
    }

    /// Number of records so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Close the sink, yielding the read-only table.
    pub fn close(self) -> RecordTable {
        RecordTable {
            records: self.records,
            warnings: self.warnings,
        }
    }
}

/// Closed, read-only table of a run's records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordTable {
    records: Vec<SampleRecord>,
    warnings: Vec<DataIntegrityWarning>,
}

impl RecordTable {
    /// Column names in order.
    pub fn columns(&self) -> &'static [&'static str; 6] {
        &COLUMNS
    }

    /// Records in temporal order.
    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// Data integrity warnings raised while recording.
    pub fn warnings(&self) -> &[DataIntegrityWarning] {
        &self.warnings
    }

    /// Row values in column order.
    pub fn rows(&self) -> impl Iterator<Item = [f64; 6]> + '_ {
        self.records.iter().map(SampleRecord::values)
    }

    /// One column by name.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = COLUMNS.iter().position(|c| *c == name)?;
        Some(self.rows().map(|row| row[index]).collect())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True for a table without rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<SampleRecord>> for RecordTable {
    fn from(records: Vec<SampleRecord>) -> Self {
        Self {
            records,
            warnings: Vec::new(),
        }
    }
}
