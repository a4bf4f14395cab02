//! Post-run statistics over a closed [`RecordTable`].

use crate::record::RecordTable;
use crate::waveform::round_to;
use serde::Serialize;
use std::fmt;

/// Statistics printed and logged after a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Number of records.
    pub records: usize,
    /// Mean spacing between successive timestamps, in milliseconds.
    pub sampling_period_ms: Option<f64>,
    /// Mean measured current in amperes.
    pub current_mean: Option<f64>,
    /// Sample standard deviation of the measured current in amperes.
    pub current_std: Option<f64>,
    /// Number of data integrity warnings attached to the table.
    pub warnings: usize,
}

impl RunSummary {
    /// Reduce a closed table.
    pub fn from_table(table: &RecordTable) -> Self {
        let times: Vec<f64> = table.records().iter().map(|r| r.relative_timestamp).collect();
        let currents: Vec<f64> = table.records().iter().map(|r| r.measured_current).collect();
        Self {
            records: table.len(),
            sampling_period_ms: mean_sampling_period(&times).map(|s| s * 1000.0),
            current_mean: mean(&currents),
            current_std: sample_std(&currents),
            warnings: table.warnings().len(),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Records: {}", self.records)?;
        match self.sampling_period_ms {
            Some(ms) => writeln!(f, "Sampling period was: {} ms", round_to(ms, 3))?,
            None => writeln!(f, "Sampling period was: n/a")?,
        }
        write!(
            f,
            "Measured current mean: {}    std: {}",
            fmt_opt(self.current_mean),
            fmt_opt(self.current_std)
        )?;
        if self.warnings > 0 {
            write!(f, "\nData integrity warnings: {}", self.warnings)?;
        }
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:e}"))
}

/// Mean absolute spacing of successive timestamps, in the timestamps' unit.
///
/// `None` with fewer than two timestamps.
pub fn mean_sampling_period(timestamps: &[f64]) -> Option<f64> {
    if timestamps.len() < 2 {
        return None;
    }
    let total: f64 = timestamps.windows(2).map(|w| w[1] - w[0]).sum();
    Some(total.abs() / (timestamps.len() - 1) as f64)
}

/// Arithmetic mean; `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation with Bessel's correction; `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}
