//! Table export.
//!
//! Writes a closed [`RecordTable`] as CSV into a date-partitioned tree:
//!
//! ```text
//! <output_dir>/<YYYY-MM-DD>/<HH>h<MM>m<SS>s_<duration>s_ME_<sample>.csv
//! ```
//!
//! The header row is always written, even for an empty table, so downstream
//! tools can rely on the six-column schema.

use crate::error::{AppResult, DaqError};
use crate::orchestrator::AbortedRun;
use crate::record::RecordTable;
use crate::state::RunState;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a run's output file is named after.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLabel {
    /// Local time the run started
    pub started: DateTime<Local>,
    /// Configured run duration
    pub duration: Duration,
    /// Sample identification
    pub sample: String,
}

impl RunLabel {
    /// Label a run starting now.
    pub fn now(duration: Duration, sample: impl Into<String>) -> Self {
        Self {
            started: Local::now(),
            duration,
            sample: sample.into(),
        }
    }

    /// File name without directory.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}s_ME_{}.csv",
            self.started.format("%Hh%Mm%Ss"),
            self.duration.as_secs(),
            self.sample
        )
    }

    /// Date folder name.
    pub fn date_folder(&self) -> String {
        self.started.format("%Y-%m-%d").to_string()
    }
}

/// Full path of the exported file under `root`.
pub fn output_path(root: &Path, label: &RunLabel) -> PathBuf {
    root.join(label.date_folder()).join(label.file_name())
}

/// Something that can persist a closed table.
pub trait TableExporter {
    /// Persist `table` and return where it went.
    fn export(&self, table: &RecordTable, label: &RunLabel) -> AppResult<PathBuf>;
}

/// CSV exporter rooted at an output directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    root: PathBuf,
}

impl CsvExporter {
    /// Create an exporter writing under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the output tree.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TableExporter for CsvExporter {
    fn export(&self, table: &RecordTable, label: &RunLabel) -> AppResult<PathBuf> {
        let path = output_path(&self.root, label);
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        write_csv(table, &path)?;
        tracing::info!(path = %path.display(), rows = table.len(), "Exported record table");
        Ok(path)
    }
}

/// A run's table after an export attempt, with the run failure kept alongside.
#[derive(Debug)]
pub struct ExportedRun {
    /// Full or partial table.
    pub table: RecordTable,
    /// Where the table was written, or why it was not.
    pub path: AppResult<PathBuf>,
    /// The error that ended the run and the state it happened in.
    pub failure: Option<(DaqError, RunState)>,
}

impl ExportedRun {
    /// Export the table of a finished or aborted run.
    pub fn export<E: TableExporter + ?Sized>(
        exporter: &E,
        outcome: Result<RecordTable, AbortedRun>,
        label: &RunLabel,
    ) -> Self {
        let (table, failure) = match outcome {
            Ok(table) => (table, None),
            Err(AbortedRun {
                error,
                state_at_failure,
                partial,
            }) => (partial, Some((error, state_at_failure))),
        };
        let path = exporter.export(&table, label);
        if let Err(e) = &path {
            tracing::error!(error = %e, records = table.len(), "Failed to export record table");
        }
        Self {
            table,
            path,
            failure,
        }
    }

    /// Collapse into one result. The run's own failure wins over an export
    /// failure, which is then attached as context.
    pub fn into_result(self) -> anyhow::Result<PathBuf> {
        match (self.failure, self.path) {
            (None, path) => path.map_err(|e| anyhow::Error::new(e).context("Failed to export record table")),
            (Some((error, state)), Ok(_)) => {
                Err(anyhow::Error::new(error).context(format!("Run aborted while {state}")))
            }
            (Some((error, state)), Err(export)) => Err(anyhow::Error::new(error).context(format!(
                "Run aborted while {state}; partial table not saved: {export}"
            ))),
        }
    }
}

/// Write `table` as CSV to `path`, header first, rows in table order.
#[cfg(feature = "storage_csv")]
pub fn write_csv(table: &RecordTable, path: &Path) -> AppResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| DaqError::Storage(format!("Failed to create CSV file: {e}")))?;
    writer
        .write_record(table.columns())
        .map_err(|e| DaqError::Storage(e.to_string()))?;
    for record in table.records() {
        writer
            .serialize(record)
            .map_err(|e| DaqError::Storage(e.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// CSV support was compiled out.
#[cfg(not(feature = "storage_csv"))]
pub fn write_csv(_table: &RecordTable, _path: &Path) -> AppResult<()> {
    Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
}
