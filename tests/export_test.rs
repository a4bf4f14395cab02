//! Export of finished and aborted runs.

#![cfg(feature = "storage_csv")]

use me_daq::config::RunConfiguration;
use me_daq::export::{output_path, CsvExporter, RunLabel, TableExporter};
use me_daq::instrument::sim::{SimBench, SimElectrometer, SimPowerSupply, SimThermometer};
use me_daq::orchestrator::MeasurementOrchestrator;
use me_daq::record::{SampleRecord, COLUMNS};
use me_daq::summary::RunSummary;
use std::time::Duration;
use tempfile::tempdir;

fn ticking_bench(fail_on_read: Option<usize>) -> SimBench {
    SimBench::new(
        SimPowerSupply::new().with_latency(Duration::from_millis(10)),
        |supply| {
            let meter = SimElectrometer::wired_to(supply)
                .with_latency(Duration::from_secs(1))
                .with_tick(Duration::from_secs(1))
                .with_response(1e-9, 0.0);
            match fail_on_read {
                Some(n) => meter.fail_on_read(n),
                None => meter,
            }
        },
        SimThermometer::new(25.0).with_latency(Duration::from_millis(10)),
    )
}

fn read_back(path: &std::path::Path) -> (Vec<String>, Vec<SampleRecord>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    let records = reader.deserialize().map(|r| r.unwrap()).collect();
    (headers, records)
}

#[tokio::test(start_paused = true)]
async fn test_completed_run_exports_schema_and_rows() {
    let dir = tempdir().unwrap();
    let bench = ticking_bench(None);
    let run = RunConfiguration::builder()
        .sample("PZT_1")
        .duration(Duration::from_secs(5))
        .build()
        .unwrap();
    let label = RunLabel::now(run.duration, run.sample.clone());
    let mut orchestrator = MeasurementOrchestrator::new(run, bench.instruments()).unwrap();
    let table = orchestrator.run().await.unwrap();

    let path = CsvExporter::new(dir.path()).export(&table, &label).unwrap();
    assert_eq!(path, output_path(dir.path(), &label));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.ends_with("_5s_ME_PZT_1.csv"), "{name}");

    let (headers, records) = read_back(&path);
    assert_eq!(headers, COLUMNS);
    assert_eq!(records, table.records());

    // 1 nS sample, so current follows the applied voltage.
    let last = records.last().unwrap();
    assert!((last.measured_current - 22.3e-9).abs() < 1e-15);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_run_partial_table_is_exportable() {
    let dir = tempdir().unwrap();
    let bench = ticking_bench(Some(4));
    let run = RunConfiguration::builder()
        .sample("PZT_2")
        .duration(Duration::from_secs(10))
        .build()
        .unwrap();
    let label = RunLabel::now(run.duration, run.sample.clone());
    let mut orchestrator = MeasurementOrchestrator::new(run, bench.instruments()).unwrap();

    let aborted = orchestrator.run().await.unwrap_err();
    let path = CsvExporter::new(dir.path())
        .export(&aborted.partial, &label)
        .unwrap();

    let (_, records) = read_back(&path);
    assert_eq!(records.len(), 3);

    let summary = RunSummary::from_table(&aborted.partial);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.sampling_period_ms, Some(1000.0));
}
