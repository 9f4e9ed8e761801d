//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::calibration::{CalibrationMode, CalibrationPoint};
use crate::error::Result;

/// Baud rates a GS-232B controller can actually be jumpered to
pub const SUPPORTED_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400];

/// Azimuth travel ranges supported by the protocol (450 on overlap models)
pub const SUPPORTED_AZIMUTH_MODES: &[f64] = &[360.0, 450.0];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub link: LinkConfig,
    pub motion: MotionConfig,
    pub calibration: CalibrationConfig,
    pub telemetry: TelemetryConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default)]
    pub auto_connect: bool,
}

/// Link supervision configuration
///
/// Timing for status polling, heartbeats, staleness detection, and the
/// reconnect backoff schedule. Heartbeat and health timeout accept `0.0`
/// to disable that mechanism.
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    #[serde(default = "default_heartbeat_interval_s")]
    pub heartbeat_interval_s: f64,

    #[serde(default = "default_health_timeout_s")]
    pub health_timeout_s: f64,

    #[serde(default = "default_reconnect_base_delay_s")]
    pub reconnect_base_delay_s: f64,

    #[serde(default = "default_reconnect_max_delay_s")]
    pub reconnect_max_delay_s: f64,

    /// Zero means retry forever
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

/// Motion planning configuration
///
/// Soft limits, axis speeds, and ramp behavior. This section is
/// hot-swappable at runtime through the motion controller.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MotionConfig {
    #[serde(default = "default_azimuth_min")]
    pub azimuth_min: f64,

    #[serde(default = "default_azimuth_max")]
    pub azimuth_max: f64,

    #[serde(default = "default_elevation_min")]
    pub elevation_min: f64,

    #[serde(default = "default_elevation_max")]
    pub elevation_max: f64,

    /// Total azimuth travel: 360, or 450 for overlap-capable rotors
    #[serde(default = "default_azimuth_mode")]
    pub azimuth_mode: f64,

    #[serde(default = "default_azimuth_speed")]
    pub azimuth_speed_deg_per_sec: f64,

    #[serde(default = "default_elevation_speed")]
    pub elevation_speed_deg_per_sec: f64,

    #[serde(default)]
    pub ramp_enabled: bool,

    #[serde(default = "default_ramp_sample_time_ms")]
    pub ramp_sample_time_ms: u64,
}

/// Calibration configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub mode: CalibrationMode,

    #[serde(default)]
    pub azimuth: AxisCalibrationConfig,

    #[serde(default)]
    pub elevation: AxisCalibrationConfig,
}

/// Calibration parameters for one axis
#[derive(Debug, Deserialize, Clone)]
pub struct AxisCalibrationConfig {
    #[serde(default)]
    pub offset: f64,

    #[serde(default = "default_scale")]
    pub scale: f64,

    #[serde(default)]
    pub points: Vec<CalibrationPoint>,
}

impl Default for AxisCalibrationConfig {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: default_scale(),
            points: Vec::new(),
        }
    }
}

/// Event log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_baud_rate() -> u32 { 9600 }

fn default_polling_interval_ms() -> u64 { 500 }
fn default_heartbeat_interval_s() -> f64 { 2.0 }
fn default_health_timeout_s() -> f64 { 6.0 }
fn default_reconnect_base_delay_s() -> f64 { 1.0 }
fn default_reconnect_max_delay_s() -> f64 { 30.0 }

fn default_azimuth_min() -> f64 { 0.0 }
fn default_azimuth_max() -> f64 { 360.0 }
fn default_elevation_min() -> f64 { 0.0 }
fn default_elevation_max() -> f64 { 90.0 }
fn default_azimuth_mode() -> f64 { 360.0 }
fn default_azimuth_speed() -> f64 { 4.0 }
fn default_elevation_speed() -> f64 { 2.0 }
fn default_ramp_sample_time_ms() -> u64 { 400 }

fn default_scale() -> f64 { 1.0 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            heartbeat_interval_s: default_heartbeat_interval_s(),
            health_timeout_s: default_health_timeout_s(),
            reconnect_base_delay_s: default_reconnect_base_delay_s(),
            reconnect_max_delay_s: default_reconnect_max_delay_s(),
            max_reconnect_attempts: 0,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            azimuth_min: default_azimuth_min(),
            azimuth_max: default_azimuth_max(),
            elevation_min: default_elevation_min(),
            elevation_max: default_elevation_max(),
            azimuth_mode: default_azimuth_mode(),
            azimuth_speed_deg_per_sec: default_azimuth_speed(),
            elevation_speed_deg_per_sec: default_elevation_speed(),
            ramp_enabled: false,
            ramp_sample_time_ms: default_ramp_sample_time_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
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
    /// use rotor_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate serial configuration
        if self.serial.auto_connect && self.serial.port.is_empty() {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("serial port cannot be empty when auto_connect is enabled")
            ));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("baud_rate must be one of: 1200, 2400, 4800, 9600, 19200, 38400")
            ));
        }

        // Validate link timing
        if self.link.polling_interval_ms == 0 || self.link.polling_interval_ms > 60000 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("polling_interval_ms must be between 1 and 60000")
            ));
        }

        if self.link.heartbeat_interval_s < 0.0 || self.link.heartbeat_interval_s > 3600.0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("heartbeat_interval_s must be between 0 (disabled) and 3600")
            ));
        }

        if self.link.health_timeout_s < 0.0 || self.link.health_timeout_s > 3600.0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("health_timeout_s must be between 0 (disabled) and 3600")
            ));
        }

        if self.link.health_timeout_s > 0.0
            && self.link.heartbeat_interval_s > 0.0
            && self.link.health_timeout_s <= self.link.heartbeat_interval_s
        {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("health_timeout_s must exceed heartbeat_interval_s, otherwise the link drops between heartbeats")
            ));
        }

        if self.link.reconnect_base_delay_s <= 0.0 || self.link.reconnect_base_delay_s > 300.0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("reconnect_base_delay_s must be between 0 (exclusive) and 300")
            ));
        }

        if self.link.reconnect_max_delay_s < self.link.reconnect_base_delay_s {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("reconnect_max_delay_s must be at least reconnect_base_delay_s")
            ));
        }

        // Validate motion configuration
        self.motion.validate()?;

        // Validate calibration
        for (axis, cal) in [("azimuth", &self.calibration.azimuth), ("elevation", &self.calibration.elevation)] {
            if !cal.offset.is_finite() || !cal.scale.is_finite() {
                return Err(crate::error::RotorBridgeError::Config(
                    toml::de::Error::custom(format!("{} calibration offset and scale must be finite", axis))
                ));
            }

            if cal.scale.abs() < 1e-9 {
                return Err(crate::error::RotorBridgeError::Config(
                    toml::de::Error::custom(format!("{} calibration scale must not be zero", axis))
                ));
            }

            for point in &cal.points {
                if !point.raw.is_finite() || !point.actual.is_finite() {
                    return Err(crate::error::RotorBridgeError::Config(
                        toml::de::Error::custom(format!("{} calibration points must be finite", axis))
                    ));
                }
            }
        }

        // Validate telemetry configuration
        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("telemetry log_dir cannot be empty when enabled")
            ));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("max_records_per_file must be greater than 0")
            ));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("max_files_to_keep must be greater than 0")
            ));
        }

        if self.telemetry.format != "jsonl" {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("log format must be 'jsonl' (only supported format)")
            ));
        }

        Ok(())
    }
}

impl MotionConfig {
    /// Validate motion values.
    ///
    /// Public because this section can be hot-swapped at runtime and the
    /// replacement must pass the same checks as the startup file.
    ///
    /// # Errors
    ///
    /// Returns error if any motion value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_AZIMUTH_MODES.contains(&self.azimuth_mode) {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("azimuth_mode must be 360 or 450")
            ));
        }

        if self.azimuth_min < 0.0 || self.azimuth_min >= self.azimuth_max {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("azimuth limits must satisfy 0 <= azimuth_min < azimuth_max")
            ));
        }

        if self.azimuth_max > self.azimuth_mode {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("azimuth_max cannot exceed azimuth_mode")
            ));
        }

        if self.elevation_min < 0.0 || self.elevation_min >= self.elevation_max {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("elevation limits must satisfy 0 <= elevation_min < elevation_max")
            ));
        }

        if self.elevation_max > 180.0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("elevation_max cannot exceed 180")
            ));
        }

        if self.azimuth_speed_deg_per_sec <= 0.0 || self.azimuth_speed_deg_per_sec > 50.0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("azimuth_speed_deg_per_sec must be between 0 (exclusive) and 50")
            ));
        }

        if self.elevation_speed_deg_per_sec <= 0.0 || self.elevation_speed_deg_per_sec > 50.0 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("elevation_speed_deg_per_sec must be between 0 (exclusive) and 50")
            ));
        }

        if self.ramp_sample_time_ms < 50 || self.ramp_sample_time_ms > 5000 {
            return Err(crate::error::RotorBridgeError::Config(
                toml::de::Error::custom("ramp_sample_time_ms must be between 50 and 5000")
            ));
        }

        Ok(())
    }
}
