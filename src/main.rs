//! CLI Entry Point for me_daq
//!
//! Provides command-line interface for:
//! - Running a measurement against the simulated bench (dry run)
//! - Checking a configuration file before a lab session
//!
//! # Usage
//!
//! Simulate a short run:
//! ```bash
//! me_daq simulate --sample BTO_3 --duration 20s --output ./data
//! ```
//!
//! Check the resolved configuration:
//! ```bash
//! me_daq check --config config/me_daq.toml
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use me_daq::config::AppConfig;
use me_daq::export::{CsvExporter, ExportedRun, RunLabel};
use me_daq::instrument::sim::SimBench;
use me_daq::logging::{self, OutputFormat, TracingConfig};
use me_daq::orchestrator::MeasurementOrchestrator;
use me_daq::summary::RunSummary;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Parser)]
#[command(name = "me_daq")]
#[command(about = "Magnetoelectric current-response acquisition", long_about = None)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct LogArgs {
    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty, global = true)]
    log_format: OutputFormat,

    /// Disable ANSI colors in log output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log span open and close events
    #[arg(long, global = true)]
    log_spans: bool,
}

impl LogArgs {
    fn apply(self, tracing: TracingConfig) -> TracingConfig {
        tracing
            .with_format(self.log_format)
            .with_ansi(!self.no_color)
            .with_span_events(self.log_spans)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a measurement against simulated instruments and export the table
    Simulate(SimulateArgs),

    /// Load and validate the configuration, then print it
    Check {
        /// Configuration file (default: config/me_daq.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SimulateArgs {
    /// Configuration file (default: config/me_daq.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sample identification
    #[arg(long)]
    sample: Option<String>,

    /// Run duration, e.g. `20s` or `2m`
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Square-wave amplitude in volts
    #[arg(long)]
    amplitude: Option<f64>,

    /// Square-wave frequency in hertz
    #[arg(long)]
    frequency: Option<f64>,

    /// Output directory root
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn parse_duration(s: &str) -> Result<Duration, humantime_serde::re::humantime::DurationError> {
    humantime_serde::re::humantime::parse_duration(s)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => simulate(args, cli.log).await,
        Commands::Check { config } => check(config),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => AppConfig::load().context("Failed to load configuration"),
    }
}

async fn simulate(args: SimulateArgs, log: LogArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(sample) = args.sample {
        config.run.sample = sample;
    }
    if let Some(duration) = args.duration {
        config.run.duration = duration;
    }
    if let Some(amplitude) = args.amplitude {
        config.run.amplitude_v = amplitude;
    }
    if let Some(frequency) = args.frequency {
        config.run.frequency_hz = frequency;
    }
    if let Some(output) = args.output {
        config.storage.output_dir = output;
    }
    config.validate().context("Invalid configuration")?;

    logging::init(log.apply(TracingConfig::from_app_config(&config)?))?;

    let bench = SimBench::default();
    let label = RunLabel::now(config.run.duration, config.run.sample.clone());
    let mut orchestrator = MeasurementOrchestrator::new(config.run.clone(), bench.instruments())?;

    let stop = orchestrator.stop_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping run");
            stop.trigger("interrupted by Ctrl-C");
        }
    });

    let outcome = orchestrator.run().await;
    interrupt.abort();

    let exporter = CsvExporter::new(&config.storage.output_dir);
    let exported = ExportedRun::export(&exporter, outcome, &label);
    if let Ok(path) = &exported.path {
        println!("Saved {} records to {}", exported.table.len(), path.display());
    }

    let summary = RunSummary::from_table(&exported.table);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }

    exported.into_result().map(|_| ())
}

fn check(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path.as_ref())?;
    config.validate().context("Invalid configuration")?;

    println!("{}", toml::to_string_pretty(&config)?);
    println!(
        "Run: {} for {}, square {} Hz 0/{} V, ceiling {} V",
        config.run.sample,
        humantime_serde::re::humantime::format_duration(config.run.duration),
        config.run.frequency_hz,
        config.run.amplitude_v,
        config.run.voltage_ceiling_v
    );
    Ok(())
}
