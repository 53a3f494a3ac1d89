//! # Configuration Module
//!
//! Handles loading and validating the agent configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::store::CellRange;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub location: LocationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Which [`crate::store::PartitionedLog`] backend to talk to
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sheets,
    File,
    Memory,
}

/// Remote store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    #[serde(default)]
    pub spreadsheet_id: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the bearer token
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    #[serde(default)]
    pub data_dir: String,

    #[serde(default = "default_config_partition")]
    pub config_partition: String,

    #[serde(default = "default_config_range")]
    pub config_range: String,

    #[serde(default = "default_max_rows_per_partition")]
    pub max_rows_per_partition: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Signed-in identity
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IdentityConfig {
    /// Empty or absent means nobody is signed in
    #[serde(default)]
    pub email: Option<String>,
}

/// Where the battery level comes from
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatterySourceKind {
    Sysfs,
    Fixed,
}

/// Host device configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_location_permission")]
    pub location_permission: bool,

    #[serde(default = "default_battery_source")]
    pub battery_source: BatterySourceKind,

    #[serde(default = "default_power_supply_dir")]
    pub power_supply_dir: String,

    #[serde(default = "default_fixed_battery_percent")]
    pub fixed_battery_percent: u8,
}

/// Where position fixes come from
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocationSourceKind {
    Gpsd,
    Fixed,
}

/// Location provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LocationConfig {
    #[serde(default = "default_location_source")]
    pub source: LocationSourceKind,

    #[serde(default = "default_gpsd_addr")]
    pub gpsd_addr: String,

    #[serde(default = "default_location_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Durable mirror of the operational log window
    #[serde(default = "default_window_file")]
    pub window_file: String,

    /// Directory for daily rolling trace files; unset logs to stdout only
    #[serde(default)]
    pub dir: Option<String>,
}

/// Job scheduling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_job_name")]
    pub job_name: String,

    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            location_permission: default_location_permission(),
            battery_source: default_battery_source(),
            power_supply_dir: default_power_supply_dir(),
            fixed_battery_percent: default_fixed_battery_percent(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: default_location_source(),
            gpsd_addr: default_gpsd_addr(),
            timeout_ms: default_location_timeout_ms(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            window_file: default_window_file(),
            dir: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            job_name: default_job_name(),
            run_on_start: default_run_on_start(),
        }
    }
}

// Default value functions
fn default_backend() -> StoreBackend { StoreBackend::Sheets }
fn default_api_base() -> String { crate::store::sheets::DEFAULT_API_BASE.to_string() }
fn default_access_token_env() -> String { "FAMILY_TRACKER_TOKEN".to_string() }
fn default_config_partition() -> String { "Sheet1".to_string() }
fn default_config_range() -> String { "A1:B".to_string() }
fn default_max_rows_per_partition() -> usize { crate::telemetry::DEFAULT_MAX_ROWS }
fn default_request_timeout_ms() -> u64 { 10000 }

fn default_location_permission() -> bool { true }
fn default_battery_source() -> BatterySourceKind { BatterySourceKind::Sysfs }
fn default_power_supply_dir() -> String {
    crate::sensors::device::DEFAULT_POWER_SUPPLY_DIR.to_string()
}
fn default_fixed_battery_percent() -> u8 { 100 }

fn default_location_source() -> LocationSourceKind { LocationSourceKind::Gpsd }
fn default_gpsd_addr() -> String { crate::sensors::gpsd::DEFAULT_GPSD_ADDR.to_string() }
fn default_location_timeout_ms() -> u64 { 30000 }

fn default_log_level() -> String { "info".to_string() }
fn default_window_file() -> String { "./logs.txt".to_string() }

fn default_job_name() -> String { "LocationTrackerWork".to_string() }
fn default_run_on_start() -> bool { true }

fn invalid(message: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use family_tracker::config::Config;
    ///
    /// let config = Config::load("config/tracker.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed config partition range
    pub fn config_range(&self) -> Result<CellRange> {
        self.store.config_range.parse()
    }

    /// Timeout for one remote store request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.store.request_timeout_ms)
    }

    /// Upper bound on one position fix
    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location.timeout_ms)
    }

    /// Signed-in identity, `None` when blank
    pub fn identity(&self) -> Option<String> {
        self.identity
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
    }

    pub fn window_file(&self) -> PathBuf {
        PathBuf::from(&self.logging.window_file)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        match self.store.backend {
            StoreBackend::Sheets => {
                if self.store.spreadsheet_id.trim().is_empty() {
                    return Err(invalid("spreadsheet_id cannot be empty for the sheets backend"));
                }
                if self.store.api_base.trim().is_empty() {
                    return Err(invalid("api_base cannot be empty for the sheets backend"));
                }
                if self.store.access_token_env.trim().is_empty() {
                    return Err(invalid("access_token_env cannot be empty for the sheets backend"));
                }
            }
            StoreBackend::File => {
                if self.store.data_dir.trim().is_empty() {
                    return Err(invalid("data_dir cannot be empty for the file backend"));
                }
            }
            StoreBackend::Memory => {}
        }

        if self.store.config_partition.trim().is_empty() {
            return Err(invalid("config_partition cannot be empty"));
        }

        if self.config_range().is_err() {
            return Err(invalid(format!(
                "config_range {:?} is not a valid A1 range",
                self.store.config_range
            )));
        }

        if self.store.max_rows_per_partition == 0 {
            return Err(invalid("max_rows_per_partition must be greater than 0"));
        }

        if self.store.request_timeout_ms == 0 || self.store.request_timeout_ms > 120000 {
            return Err(invalid("request_timeout_ms must be between 1 and 120000"));
        }

        if self.location.timeout_ms == 0 || self.location.timeout_ms > 600000 {
            return Err(invalid("location timeout_ms must be between 1 and 600000"));
        }

        if self.location.source == LocationSourceKind::Fixed {
            if !(-90.0..=90.0).contains(&self.location.latitude) {
                return Err(invalid("latitude must be between -90 and 90"));
            }
            if !(-180.0..=180.0).contains(&self.location.longitude) {
                return Err(invalid("longitude must be between -180 and 180"));
            }
        }

        if self.location.source == LocationSourceKind::Gpsd
            && self.location.gpsd_addr.trim().is_empty()
        {
            return Err(invalid("gpsd_addr cannot be empty"));
        }

        if self.device.fixed_battery_percent > 100 {
            return Err(invalid("fixed_battery_percent must be between 0 and 100"));
        }

        if self.logging.window_file.trim().is_empty() {
            return Err(invalid("window_file cannot be empty"));
        }

        if self.schedule.job_name.trim().is_empty() {
            return Err(invalid("job_name cannot be empty"));
        }

        Ok(())
    }
}
