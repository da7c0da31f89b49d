//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, RfError};
use crate::power::TxPower;
use crate::protocol_id::{ChipModel, ProtocolId, ProtocolKind};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Protocol selection
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default = "default_module")]
    pub module: String,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default)]
    pub option: u8,

    #[serde(default = "default_controller_id")]
    pub controller_id: u32,

    #[serde(default)]
    pub power: TxPower,
}

/// Embedding loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_us")]
    pub tick_interval_us: u64,

    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

/// Transceiver bring-up
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_reset_attempts")]
    pub reset_attempts: u32,
}

/// Packet capture configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: u32,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_module() -> String { "cyrf6936".to_string() }
fn default_protocol() -> String { "devo".to_string() }
fn default_controller_id() -> u32 { 0x1234_5678 }

fn default_tick_interval_us() -> u64 { 250 }
fn default_status_interval_ms() -> u64 { 4000 }

fn default_reset_attempts() -> u32 { 5 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> u32 { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_log_format() -> String { "jsonl".to_string() }

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            module: default_module(),
            protocol: default_protocol(),
            option: 0,
            controller_id: default_controller_id(),
            power: TxPower::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_us: default_tick_interval_us(),
            status_interval_ms: default_status_interval_ms(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { reset_attempts: default_reset_attempts() }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            format: default_log_format(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> RfError {
    RfError::Config(toml::de::Error::custom(msg))
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
    /// use multirf_tx::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Chip family named by `radio.module`
    pub fn chip(&self) -> Result<ChipModel> {
        ChipModel::from_name(&self.radio.module)
            .ok_or_else(|| invalid(format!("unknown radio module '{}'", self.radio.module)))
    }

    /// Vendor state machine named by `radio.protocol`
    pub fn protocol_kind(&self) -> Result<ProtocolKind> {
        let chip = self.chip()?;
        let kind = ProtocolKind::from_name(&self.radio.protocol)
            .ok_or_else(|| invalid(format!("unknown protocol '{}'", self.radio.protocol)))?;
        if kind.chip() != chip {
            return Err(invalid(format!(
                "protocol '{}' does not run on {}",
                kind.name(),
                chip.name()
            )));
        }
        Ok(kind)
    }

    /// Packed module/protocol/option selector
    pub fn protocol_id(&self) -> Result<ProtocolId> {
        let kind = self.protocol_kind()?;
        Ok(ProtocolId::for_kind(kind, self.radio.option))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Module and protocol must name a known pair
        self.protocol_kind()?;

        if self.scheduler.tick_interval_us == 0 || self.scheduler.tick_interval_us > 100_000 {
            return Err(invalid("tick_interval_us must be between 1 and 100000"));
        }

        if self.scheduler.status_interval_ms == 0 || self.scheduler.status_interval_ms > 600_000 {
            return Err(invalid("status_interval_ms must be between 1 and 600000"));
        }

        if !(1..=50).contains(&self.device.reset_attempts) {
            return Err(invalid("reset_attempts must be between 1 and 50"));
        }

        if self.telemetry.enabled && self.telemetry.log_dir.is_empty() {
            return Err(invalid("telemetry log_dir cannot be empty when enabled"));
        }

        if self.telemetry.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.telemetry.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        if self.telemetry.format != "jsonl" {
            return Err(invalid("log format must be 'jsonl' (only supported format)"));
        }

        Ok(())
    }
}
