//! Configuration System using Figment
//!
//! Strongly-typed settings for the controller. Values are layered, later
//! layers winning:
//! 1. Built-in defaults (the board deployment)
//! 2. A TOML file (`config/default.toml` unless another path is given)
//! 3. Environment variables prefixed with `SMART_TRAFFIC_`, using `__` between
//!    nesting levels
//!
//! # Example
//! ```no_run
//! use smart_traffic::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // SMART_TRAFFIC_TIMING__PHASES=6 overrides timing.phases
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Running {} phases", settings.timing.phases);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, TrafficError};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Phase timing
    pub timing: TimingSettings,
    /// Speed sensor geometry and limit
    pub sensors: SensorSettings,
    /// GPIO line assignment
    pub pins: PinSettings,
    /// Report sink
    pub report: ReportSettings,
    /// Hardware backend selection
    pub hardware: HardwareSettings,
    /// Traffic profile for the simulated backend
    pub simulation: SimulationSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Console log format
    pub log_format: LogFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "Smart Traffic".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored output for a terminal
    #[default]
    Pretty,
    /// Single-line output without colors
    Compact,
    /// One JSON object per event
    Json,
}

/// Phase timing. All durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Idle time between line setup and the first phase
    pub startup_delay_ms: u64,
    /// Both-stop clearance interval at every phase change
    pub clearance_ms: u64,
    /// Normal phase duration
    pub phase_ms: u64,
    /// Remaining phase time once cross-traffic demand is detected
    pub early_switch_ms: u64,
    /// Total number of phases before the controller halts
    pub phases: usize,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            startup_delay_ms: 5000,
            clearance_ms: 3000,
            phase_ms: 15000,
            early_switch_ms: 1500,
            phases: 4,
        }
    }
}

impl TimingSettings {
    /// `startup_delay_ms` as a [`Duration`].
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    /// `clearance_ms` as a [`Duration`].
    pub fn clearance(&self) -> Duration {
        Duration::from_millis(self.clearance_ms)
    }

    /// `phase_ms` as a [`Duration`].
    pub fn phase(&self) -> Duration {
        Duration::from_millis(self.phase_ms)
    }

    /// `early_switch_ms` as a [`Duration`].
    pub fn early_switch(&self) -> Duration {
        Duration::from_millis(self.early_switch_ms)
    }
}

/// Speed sensor geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Distance between entry and exit sensor in meters
    pub distance_m: f64,
    /// Speeds above this many m/s are logged as violations
    pub speed_limit_mps: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            distance_m: 0.14,
            speed_limit_mps: 0.35,
        }
    }
}

/// GPIO line numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinSettings {
    /// Road A entry sensor
    pub road_a_entry: u32,
    /// Road A exit sensor
    pub road_a_exit: u32,
    /// Road B entry sensor
    pub road_b_entry: u32,
    /// Road B exit sensor
    pub road_b_exit: u32,
    /// Road A stop signal
    pub road_a_stop: u32,
    /// Road B stop signal
    pub road_b_stop: u32,
    /// Shared go signal
    pub go: u32,
}

impl Default for PinSettings {
    fn default() -> Self {
        Self {
            road_a_entry: 11,
            road_a_exit: 3,
            road_b_entry: 2,
            road_b_exit: 1,
            road_a_stop: 19,
            road_b_stop: 18,
            go: 0,
        }
    }
}

impl PinSettings {
    fn all(&self) -> [(&'static str, u32); 7] {
        [
            ("road_a_entry", self.road_a_entry),
            ("road_a_exit", self.road_a_exit),
            ("road_b_entry", self.road_b_entry),
            ("road_b_exit", self.road_b_exit),
            ("road_a_stop", self.road_a_stop),
            ("road_b_stop", self.road_b_stop),
            ("go", self.go),
        ]
    }
}

/// Report sink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Append-only text log
    pub log_path: PathBuf,
    /// Also print every report block to stdout
    pub echo: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("log.txt"),
            echo: true,
        }
    }
}

/// Which [`DigitalIo`](crate::hardware::DigitalIo) implementation drives the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Linux sysfs GPIO lines
    #[default]
    Sysfs,
    /// Random traffic, no hardware
    Simulated,
}

/// Hardware backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSettings {
    /// Which backend drives the run
    pub backend: Backend,
    /// sysfs GPIO class directory
    pub sysfs_root: PathBuf,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Sysfs,
            sysfs_root: PathBuf::from(crate::hardware::sysfs::DEFAULT_SYSFS_ROOT),
        }
    }
}

/// Traffic profile for the simulated backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Fixed RNG seed; random when absent
    pub seed: Option<u64>,
    /// Average gap between vehicles on one road
    pub mean_gap_ms: u64,
    /// Slowest simulated vehicle
    pub min_speed_mps: f64,
    /// Fastest simulated vehicle
    pub max_speed_mps: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: None,
            mean_gap_ms: 4000,
            min_speed_mps: 0.2,
            max_speed_mps: 0.45,
        }
    }
}

impl Settings {
    /// Load configuration from `config/default.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix SMART_TRAFFIC_
    /// Example: SMART_TRAFFIC_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| TrafficError::Config(Box::new(e)))
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SMART_TRAFFIC_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(self.sensors.distance_m > 0.0) {
            return Err(invalid(format!(
                "Invalid distance_m {}. Must be positive",
                self.sensors.distance_m
            )));
        }
        if !(self.sensors.speed_limit_mps > 0.0) {
            return Err(invalid(format!(
                "Invalid speed_limit_mps {}. Must be positive",
                self.sensors.speed_limit_mps
            )));
        }

        let timing = &self.timing;
        if timing.phase_ms == 0 || timing.early_switch_ms == 0 {
            return Err(invalid("phase_ms and early_switch_ms must be non-zero"));
        }
        if timing.early_switch_ms >= timing.phase_ms {
            return Err(invalid(format!(
                "early_switch_ms ({}) must be shorter than phase_ms ({})",
                timing.early_switch_ms, timing.phase_ms
            )));
        }

        let mut seen = HashSet::new();
        for (name, line) in self.pins.all() {
            if !seen.insert(line) {
                return Err(invalid(format!(
                    "Pin {name} reuses GPIO line {line}; every line must be distinct"
                )));
            }
        }

        let sim = &self.simulation;
        if !(sim.min_speed_mps > 0.0 && sim.min_speed_mps <= sim.max_speed_mps) {
            return Err(invalid(format!(
                "Invalid simulation speed range {}..{}",
                sim.min_speed_mps, sim.max_speed_mps
            )));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| TrafficError::Configuration(e.to_string()))
    }
}

fn invalid(message: impl Into<String>) -> TrafficError {
    TrafficError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_board_deployment() {
        let settings = Settings::default();
        assert_eq!(settings.timing.phases, 4);
        assert_eq!(settings.timing.phase(), Duration::from_secs(15));
        assert_eq!(settings.timing.early_switch(), Duration::from_millis(1500));
        assert_eq!(settings.timing.clearance(), Duration::from_secs(3));
        assert_eq!(settings.sensors.distance_m, 0.14);
        assert_eq!(settings.sensors.speed_limit_mps, 0.35);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn file_overrides_only_given_keys() {
        let file = write_config(
            r#"
            [timing]
            phases = 6
            phase_ms = 8000

            [hardware]
            backend = "simulated"
            "#,
        );

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.timing.phases, 6);
        assert_eq!(settings.timing.phase_ms, 8000);
        assert_eq!(settings.timing.clearance_ms, 3000);
        assert_eq!(settings.hardware.backend, Backend::Simulated);
        assert_eq!(settings.pins, PinSettings::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.timing, TimingSettings::default());
    }

    #[test]
    fn malformed_file_is_reported() {
        let file = write_config("[timing]\nphases = \"many\"\n");
        assert!(matches!(
            Settings::load_from(file.path()),
            Err(TrafficError::Config(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.timing.early_switch_ms = settings.timing.phase_ms;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.sensors.distance_m = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.pins.go = settings.pins.road_a_stop;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("go"));

        let mut settings = Settings::default();
        settings.simulation.min_speed_mps = 1.0;
        settings.simulation.max_speed_mps = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rendered_toml_loads_back() {
        let mut settings = Settings::default();
        settings.timing.phases = 2;
        settings.simulation.seed = Some(9);

        let file = write_config(&settings.to_toml().unwrap());
        assert_eq!(Settings::load_from(file.path()).unwrap(), settings);
    }
}
