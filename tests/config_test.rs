//! Layered configuration loading: defaults, TOML file, environment.

use figment::Jail;
use me_daq::config::AppConfig;
use me_daq::error::DaqError;
use std::time::Duration;

#[test]
fn test_missing_file_falls_back_to_defaults() {
    Jail::expect_with(|jail| {
        let config = AppConfig::load_from(jail.directory().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        Ok(())
    });
}

#[test]
fn test_file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "me_daq.toml",
            r#"
            [application]
            log_level = "debug"

            [run]
            sample = "BTO_3"
            duration = "2m"
            amplitude_v = 10.0
            frequency_hz = 0.5

            [storage]
            output_dir = "/tmp/me"
            "#,
        )?;

        let config = AppConfig::load_from("me_daq.toml").unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.run.sample, "BTO_3");
        assert_eq!(config.run.duration, Duration::from_secs(120));
        assert_eq!(config.run.amplitude_v, 10.0);
        // Untouched keys keep their defaults.
        assert_eq!(config.run.nplc, 1.0);
        assert_eq!(config.run.voltage_ceiling_v, 23.0);
        assert!(config.validate().is_ok());
        Ok(())
    });
}

#[test]
fn test_environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("me_daq.toml", "[run]\namplitude_v = 10.0\n")?;
        jail.set_env("ME_DAQ_RUN__AMPLITUDE_V", "5.5");
        jail.set_env("ME_DAQ_RUN__SAMPLE", "env_sample");

        let config = AppConfig::load_from("me_daq.toml").unwrap();
        assert_eq!(config.run.amplitude_v, 5.5);
        assert_eq!(config.run.sample, "env_sample");
        Ok(())
    });
}

#[test]
fn test_shipped_config_file_is_valid() {
    // Inside a jail so no other test's environment leaks in.
    Jail::expect_with(|_jail| {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/me_daq.toml");
        let config = AppConfig::load_from(path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.amplitude_v, 22.3);
        assert_eq!(config.run.duration, Duration::from_secs(60));
        Ok(())
    });
}

#[test]
fn test_malformed_value_is_a_load_error() {
    Jail::expect_with(|jail| {
        jail.create_file("me_daq.toml", "[run]\nduration = \"soon\"\n")?;
        let err = AppConfig::load_from("me_daq.toml").unwrap_err();
        assert!(matches!(err, DaqError::Config(_)));
        Ok(())
    });
}

#[test]
fn test_semantically_invalid_file_fails_validation() {
    Jail::expect_with(|jail| {
        jail.create_file("me_daq.toml", "[run]\namplitude_v = 30.0\n")?;
        let config = AppConfig::load_from("me_daq.toml").unwrap();
        assert!(matches!(config.validate(), Err(DaqError::Configuration(_))));
        Ok(())
    });
}

#[test]
fn test_environment_cannot_raise_voltage_ceiling() {
    Jail::expect_with(|jail| {
        jail.set_env("ME_DAQ_RUN__VOLTAGE_CEILING_V", "100");
        jail.set_env("ME_DAQ_RUN__AMPLITUDE_V", "60");

        let config = AppConfig::load_from(jail.directory().join("absent.toml")).unwrap();
        assert_eq!(config.run.voltage_ceiling_v, 100.0);
        match config.validate() {
            Err(DaqError::Configuration(msg)) => assert!(msg.contains("voltage_ceiling_v"), "{msg}"),
            other => panic!("expected a configuration error, got {other:?}"),
        }
        Ok(())
    });
}

#[test]
fn test_environment_may_lower_voltage_ceiling() {
    Jail::expect_with(|jail| {
        jail.set_env("ME_DAQ_RUN__VOLTAGE_CEILING_V", "10");
        jail.set_env("ME_DAQ_RUN__AMPLITUDE_V", "12");

        let config = AppConfig::load_from(jail.directory().join("absent.toml")).unwrap();
        assert!(matches!(config.validate(), Err(DaqError::Configuration(_))));
        Ok(())
    });
}
