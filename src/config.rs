//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading. Configuration is
//! layered from:
//! 1. Built-in defaults (the standard 60 s, 22.3 V, 0.1 Hz run)
//! 2. A TOML file (default `config/me_daq.toml`)
//! 3. Environment variables prefixed with `ME_DAQ_`, nested with `__`
//!    (e.g. `ME_DAQ_RUN__AMPLITUDE_V=10`)
//!
//! # Example
//! ```no_run
//! use me_daq::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Sample: {}", config.run.sample);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use crate::instrument::ElectrometerSettings;
use crate::safety::{SafetyGuard, DEFAULT_VOLTAGE_CEILING_V, MAX_VOLTAGE_CEILING_V};
use crate::validation::{is_finite_positive, is_in_range, is_not_empty, is_valid_file_component};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/me_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ME_DAQ_";

/// Valid `log_level` values.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Parameters of the measurement run
    pub run: RunConfiguration,
    /// Export settings
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the date-partitioned output tree
    pub output_dir: PathBuf,
}

/// Immutable parameters of one measurement run.
///
/// Built once before the run and handed to the orchestrator, which owns it for
/// the run's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfiguration {
    /// Sample identification, embedded in the output file name
    pub sample: String,
    /// Wall-clock duration of the acquisition loop
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Square-wave high level in volts
    pub amplitude_v: f64,
    /// Square-wave frequency in hertz
    pub frequency_hz: f64,
    /// Electrometer current range upper limit in amperes
    pub current_range_a: f64,
    /// Electrometer integration period in power line cycles (0.01-10)
    pub nplc: f64,
    /// Electrometer averaging filter window (0 = disabled)
    pub average_window: u32,
    /// Electrometer median filter rank (0 = disabled)
    pub median_rank: u32,
    /// Run electrometer zero correction during setup
    pub zero_correct: bool,
    /// Hardware ceiling for any commanded voltage
    pub voltage_ceiling_v: f64,
    /// Supply current limit set during setup
    pub current_limit_a: f64,
    /// Temperature transmitter channel
    pub temperature_channel: String,
    /// Electrometer communication timeout
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "me_daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("../data"),
        }
    }
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            sample: "test".to_string(),
            duration: Duration::from_secs(60),
            amplitude_v: 22.3,
            frequency_hz: 0.1,
            current_range_a: 20e-9,
            nplc: 1.0,
            average_window: 0,
            median_rank: 1,
            zero_correct: true,
            voltage_ceiling_v: DEFAULT_VOLTAGE_CEILING_V,
            current_limit_a: 20.0,
            temperature_channel: "A".to_string(),
            io_timeout: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The layered provider used by [`AppConfig::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if !LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.storage.output_dir.as_os_str().is_empty() {
            return Err(DaqError::Configuration(
                "storage.output_dir cannot be empty".to_string(),
            ));
        }
        self.run.validate()
    }
}

fn field<T>(name: &str, check: Result<T, &'static str>) -> AppResult<T> {
    check.map_err(|reason| DaqError::Configuration(format!("{name}: {reason}")))
}

impl RunConfiguration {
    /// Start a builder seeded with the defaults.
    pub fn builder() -> RunConfigurationBuilder {
        RunConfigurationBuilder {
            config: RunConfiguration::default(),
        }
    }

    /// Check every parameter; the first failure is returned.
    pub fn validate(&self) -> AppResult<()> {
        field("sample", is_valid_file_component(&self.sample))?;
        if self.duration.is_zero() {
            return Err(DaqError::Configuration(
                "duration: value must be greater than 0".to_string(),
            ));
        }
        field("frequency_hz", is_finite_positive(self.frequency_hz))?;
        field("current_range_a", is_finite_positive(self.current_range_a))?;
        field("current_range_a", is_in_range(self.current_range_a, 20e-12..=20e-3))?;
        field("nplc", is_in_range(self.nplc, 0.01..=10.0))?;
        field("average_window", is_in_range(self.average_window, 0..=100))?;
        field("median_rank", is_in_range(self.median_rank, 0..=5))?;
        field("current_limit_a", is_finite_positive(self.current_limit_a))?;
        field("temperature_channel", is_not_empty(&self.temperature_channel))?;
        if self.io_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "io_timeout: value must be greater than 0".to_string(),
            ));
        }
        field(
            "voltage_ceiling_v",
            is_in_range(self.voltage_ceiling_v, f64::MIN_POSITIVE..=MAX_VOLTAGE_CEILING_V),
        )?;
        if self.amplitude_v < 0.0 {
            return Err(DaqError::Configuration(format!(
                "amplitude_v: value must not be negative, got {}",
                self.amplitude_v
            )));
        }
        self.safety_guard()?.check_amplitude(self.amplitude_v)
    }

    /// Interlock sized from `voltage_ceiling_v`.
    pub fn safety_guard(&self) -> AppResult<SafetyGuard> {
        SafetyGuard::new(self.voltage_ceiling_v)
    }

    /// Settings handed to the electrometer during setup.
    pub fn electrometer_settings(&self) -> ElectrometerSettings {
        ElectrometerSettings {
            range_a: self.current_range_a,
            nplc: self.nplc,
            average_window: self.average_window,
            median_rank: self.median_rank,
            zero_correct: self.zero_correct,
            io_timeout: self.io_timeout,
        }
    }
}

/// Named construction of a [`RunConfiguration`].
///
/// ```
/// use me_daq::config::RunConfiguration;
/// use std::time::Duration;
///
/// let run = RunConfiguration::builder()
///     .sample("BTO_3")
///     .duration(Duration::from_secs(5))
///     .amplitude_v(10.0)
///     .frequency_hz(0.5)
///     .build()
///     .unwrap();
/// assert_eq!(run.nplc, 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct RunConfigurationBuilder {
    config: RunConfiguration,
}

impl RunConfigurationBuilder {
    /// Sample identification
    pub fn sample(mut self, sample: impl Into<String>) -> Self {
        self.config.sample = sample.into();
        self
    }

    /// Run duration
    pub fn duration(mut self, duration: Duration) -> Self {
        self.config.duration = duration;
        self
    }

    /// Stimulus amplitude in volts
    pub fn amplitude_v(mut self, volts: f64) -> Self {
        self.config.amplitude_v = volts;
        self
    }

    /// Stimulus frequency in hertz
    pub fn frequency_hz(mut self, hz: f64) -> Self {
        self.config.frequency_hz = hz;
        self
    }

    /// Current range in amperes
    pub fn current_range_a(mut self, amps: f64) -> Self {
        self.config.current_range_a = amps;
        self
    }

    /// Integration period in power line cycles
    pub fn nplc(mut self, nplc: f64) -> Self {
        self.config.nplc = nplc;
        self
    }

    /// Averaging window (0 = disabled)
    pub fn average_window(mut self, window: u32) -> Self {
        self.config.average_window = window;
        self
    }

    /// Voltage ceiling in volts
    pub fn voltage_ceiling_v(mut self, volts: f64) -> Self {
        self.config.voltage_ceiling_v = volts;
        self
    }

    /// Temperature channel id
    pub fn temperature_channel(mut self, channel: impl Into<String>) -> Self {
        self.config.temperature_channel = channel.into();
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> AppResult<RunConfiguration> {
        self.config.validate()?;
        Ok(self.config)
    }
}
