//! Configuration system using Figment.
//!
//! Strongly-typed settings for the scanner, loaded from:
//! 1. `qscope.toml` (base configuration, path overridable on the CLI)
//! 2. Environment variables prefixed with `QSCOPE_` (nested keys separated
//!    by `__`, e.g. `QSCOPE_APPLICATION__LOG_LEVEL=debug`)
//!
//! Durations are human-readable (`"300us"`, `"1s"`) via `humantime-serde`.
//! Every load runs [`Settings::validate`]; semantic problems surface as
//! [`ScanError::Configuration`] before any hardware is touched.

use crate::error::{ScanError, ScanResult};
use crate::plan::HardwareLimits;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "qscope.toml";

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application-level settings
    pub application: ApplicationSettings,
    /// Output hardware and counter channel configuration
    pub hardware: HardwareSettings,
    /// External scan-process configuration
    pub scanner: ScannerSettings,
    /// Scan-file output settings
    pub storage: StorageSettings,
    /// Translation stage settings (volumetric mode)
    pub stage: StageSettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Output and counter hardware configuration.
///
/// Channel names use the vendor's physical naming (`Dev1/ao0` etc.); the
/// core never interprets them beyond passing them to the device collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// Analog output channels, fast axis first
    pub ao_channels: Vec<String>,
    /// Edge-counting input channel
    pub counter_channel: String,
    /// Terminal the detector pulses arrive on
    pub counter_source_terminal: String,
    /// Shared start-trigger terminal for both tasks
    pub trigger_terminal: String,
    /// Galvo command voltage floor
    pub voltage_min: f64,
    /// Galvo command voltage ceiling
    pub voltage_max: f64,
    /// Maximum sustainable line rate of the fast-axis actuator (Hz)
    pub max_line_rate_hz: f64,
    /// Dead time at the start of each line while the fast axis settles
    #[serde(with = "humantime_serde")]
    pub settling_time: Duration,
    /// Maximum output sample rate of the DAQ hardware (Hz)
    pub max_sample_rate_hz: f64,
    /// Fixed margin added to the hardware read deadline
    #[serde(with = "humantime_serde")]
    pub read_margin: Duration,
}

/// External scan-process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    /// Scanner executable invoked with `-xs -ys -xe -ye -st -dw` flags
    pub program: PathBuf,
    /// Result stream the scanner appends to while running
    pub stream_path: PathBuf,
    /// Progress polling interval against the live stream
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Fixed margin added to the process deadline
    #[serde(with = "humantime_serde")]
    pub deadline_margin: Duration,
}

/// Scan-file output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory scan files are autosaved into
    pub output_dir: PathBuf,
    /// Filename prefix for autosaved scans
    pub prefix: String,
}

/// Translation stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSettings {
    /// Per-move timeout for stage motion
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings {
                name: "qscope".to_string(),
                log_level: "info".to_string(),
            },
            hardware: HardwareSettings {
                ao_channels: vec!["Dev1/ao0".to_string(), "Dev1/ao1".to_string()],
                counter_channel: "Dev1/ctr0".to_string(),
                counter_source_terminal: "/Dev1/PFI0".to_string(),
                trigger_terminal: "/Dev1/PFI0".to_string(),
                voltage_min: -10.0,
                voltage_max: 10.0,
                max_line_rate_hz: 175.0,
                settling_time: Duration::from_micros(300),
                max_sample_rate_hz: 500_000.0,
                read_margin: Duration::from_secs(1),
            },
            scanner: ScannerSettings {
                program: PathBuf::from("scanwitharg"),
                stream_path: PathBuf::from("lua_output.txt"),
                poll_interval: Duration::from_millis(150),
                deadline_margin: Duration::from_secs(5),
            },
            storage: StorageSettings {
                output_dir: PathBuf::from("data"),
                prefix: "scan".to_string(),
            },
            stage: StageSettings {
                move_timeout: Duration::from_secs(60),
            },
        }
    }
}

impl Settings {
    /// Load settings from the TOML file (if present) and environment,
    /// starting from the built-in defaults.
    pub fn load(config_path: Option<&Path>) -> ScanResult<Self> {
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("QSCOPE_").split("__"))
            .extract()
            .map_err(|e| ScanError::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what parsing enforces.
    pub fn validate(&self) -> ScanResult<()> {
        if self.hardware.ao_channels.len() != 2 {
            return Err(ScanError::Configuration(format!(
                "expected 2 analog output channels (fast, slow), got {}",
                self.hardware.ao_channels.len()
            )));
        }
        if self.hardware.voltage_min >= self.hardware.voltage_max {
            return Err(ScanError::Configuration(
                "voltage_min must be below voltage_max".to_string(),
            ));
        }
        if self.hardware.max_line_rate_hz <= 0.0 {
            return Err(ScanError::Configuration(
                "max_line_rate_hz must be positive".to_string(),
            ));
        }
        if self.hardware.max_sample_rate_hz <= 0.0 {
            return Err(ScanError::Configuration(
                "max_sample_rate_hz must be positive".to_string(),
            ));
        }
        if self.scanner.poll_interval.is_zero() {
            return Err(ScanError::Configuration(
                "scanner poll_interval must be non-zero".to_string(),
            ));
        }
        if self.storage.prefix.is_empty() || self.storage.prefix.contains('_') {
            return Err(ScanError::Configuration(
                "storage prefix must be non-empty and must not contain '_'".to_string(),
            ));
        }
        Ok(())
    }

    /// Hardware rate limits derived from the settings.
    pub fn limits(&self) -> HardwareLimits {
        HardwareLimits {
            max_line_rate_hz: self.hardware.max_line_rate_hz,
            settling_time: self.hardware.settling_time,
            max_sample_rate_hz: self.hardware.max_sample_rate_hz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.hardware.ao_channels.len(), 2);
        assert_eq!(settings.hardware.settling_time, Duration::from_micros(300));
    }

    #[test]
    fn rejects_underscore_prefix() {
        let mut settings = Settings::default();
        settings.storage.prefix = "my_scan".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_inverted_voltage_range() {
        let mut settings = Settings::default();
        settings.hardware.voltage_min = 5.0;
        settings.hardware.voltage_max = -5.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_with_missing_file_uses_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/qscope.toml"))).unwrap();
        assert_eq!(settings.application.name, "qscope");
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qscope.toml");
        std::fs::write(
            &path,
            "[hardware]\nmax_line_rate_hz = 200.0\nsettling_time = \"250us\"\n",
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.hardware.max_line_rate_hz, 200.0);
        assert_eq!(settings.hardware.settling_time, Duration::from_micros(250));
        // untouched sections keep their defaults
        assert_eq!(settings.storage.prefix, "scan");
    }
}
