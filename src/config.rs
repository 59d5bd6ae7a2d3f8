//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::device::pca9685::ServoRange;
use crate::error::{PeriphLinkError, Result};
use crate::ping::{PingTiming, Role};
use crate::radio::registers::{setup_aw_for, MAX_CHANNEL, MAX_PAYLOAD_SIZE, MAX_RETRY_FIELD};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub servo: ServoConfig,
    #[serde(default)]
    pub expander: ExpanderConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// nRF24L01+ radio configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RadioConfig {
    #[serde(default)]
    pub spi_bus: u8,

    #[serde(default = "default_spi_clock_hz")]
    pub spi_clock_hz: u32,

    #[serde(default = "default_ce_pin")]
    pub ce_pin: u8,

    #[serde(default)]
    pub irq_pin: Option<u8>,

    #[serde(default = "default_channel")]
    pub channel: u8,

    #[serde(default = "default_payload_size")]
    pub payload_size: usize,

    #[serde(default = "default_address_width")]
    pub address_width: usize,

    #[serde(default = "default_retry_delay")]
    pub retry_delay: u8,

    #[serde(default = "default_retry_count")]
    pub retry_count: u8,

    #[serde(default = "default_writing_pipe")]
    pub writing_pipe: String,

    #[serde(default = "default_reading_pipe")]
    pub reading_pipe: String,

    #[serde(default = "default_role")]
    pub role: Role,
}

/// Ping-pong timing
#[derive(Debug, Deserialize, Clone)]
pub struct PingConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_responder_holdoff_ms")]
    pub responder_holdoff_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// PCA9685 servo controller configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServoConfig {
    #[serde(default = "default_device_enabled")]
    pub enabled: bool,

    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: u8,

    #[serde(default = "default_servo_address")]
    pub i2c_address: u8,

    #[serde(default = "default_pwm_frequency_hz")]
    pub pwm_frequency_hz: f64,

    #[serde(default)]
    pub min_angle: u16,

    #[serde(default = "default_max_angle")]
    pub max_angle: u16,

    #[serde(default = "default_min_pulse")]
    pub min_pulse: u16,

    #[serde(default = "default_max_pulse")]
    pub max_pulse: u16,
}

/// MCP23017 I/O expander configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ExpanderConfig {
    #[serde(default = "default_device_enabled")]
    pub enabled: bool,

    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: u8,

    #[serde(default = "default_expander_address")]
    pub i2c_address: u8,
}

/// Host GPIO configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpioConfig {
    #[serde(default = "default_pin_count")]
    pub pin_count: u8,

    #[serde(default = "default_status_led_pin")]
    pub status_led_pin: Option<u8>,
}

/// Servo calibration preferences
#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default = "default_calibration_path")]
    pub path: String,

    #[serde(default = "default_calibration_channels")]
    pub channels: u8,

    #[serde(default = "default_left_angle")]
    pub default_left: u16,

    #[serde(default = "default_right_angle")]
    pub default_right: u16,
}

/// Telemetry configuration
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
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub file_dir: Option<String>,
}

// Default value functions
fn default_spi_clock_hz() -> u32 { 8_000_000 }
fn default_ce_pin() -> u8 { 22 }
fn default_channel() -> u8 { 76 }
fn default_payload_size() -> usize { 4 }
fn default_address_width() -> usize { 5 }
fn default_retry_delay() -> u8 { 15 }
fn default_retry_count() -> u8 { 15 }
fn default_writing_pipe() -> String { "1Node".to_string() }
fn default_reading_pipe() -> String { "2Node".to_string() }
fn default_role() -> Role { Role::Initiator }

fn default_timeout_ms() -> u64 { 200 }
fn default_interval_ms() -> u64 { 1000 }
fn default_responder_holdoff_ms() -> u64 { 925 }
fn default_poll_interval_ms() -> u64 { 1 }

fn default_device_enabled() -> bool { true }
fn default_i2c_bus() -> u8 { 1 }
fn default_servo_address() -> u8 { 0x40 }
fn default_pwm_frequency_hz() -> f64 { 50.0 }
fn default_max_angle() -> u16 { 180 }
fn default_min_pulse() -> u16 { 145 }
fn default_max_pulse() -> u16 { 580 }

fn default_expander_address() -> u8 { 0x20 }

fn default_pin_count() -> u8 { 28 }
fn default_status_led_pin() -> Option<u8> { Some(13) }

fn default_calibration_path() -> String { "./calibration.toml".to_string() }
fn default_calibration_channels() -> u8 { 16 }
fn default_left_angle() -> u16 { 20 }
fn default_right_angle() -> u16 { 40 }

fn default_telemetry_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            spi_clock_hz: default_spi_clock_hz(),
            ce_pin: default_ce_pin(),
            irq_pin: None,
            channel: default_channel(),
            payload_size: default_payload_size(),
            address_width: default_address_width(),
            retry_delay: default_retry_delay(),
            retry_count: default_retry_count(),
            writing_pipe: default_writing_pipe(),
            reading_pipe: default_reading_pipe(),
            role: default_role(),
        }
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            interval_ms: default_interval_ms(),
            responder_holdoff_ms: default_responder_holdoff_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            enabled: default_device_enabled(),
            i2c_bus: default_i2c_bus(),
            i2c_address: default_servo_address(),
            pwm_frequency_hz: default_pwm_frequency_hz(),
            min_angle: 0,
            max_angle: default_max_angle(),
            min_pulse: default_min_pulse(),
            max_pulse: default_max_pulse(),
        }
    }
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            enabled: default_device_enabled(),
            i2c_bus: default_i2c_bus(),
            i2c_address: default_expander_address(),
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            pin_count: default_pin_count(),
            status_led_pin: default_status_led_pin(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: default_calibration_path(),
            channels: default_calibration_channels(),
            default_left: default_left_angle(),
            default_right: default_right_angle(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_telemetry_enabled(),
            log_dir: default_log_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl PingConfig {
    pub fn timing(&self) -> PingTiming {
        PingTiming {
            timeout: Duration::from_millis(self.timeout_ms),
            interval: Duration::from_millis(self.interval_ms),
            responder_holdoff: Duration::from_millis(self.responder_holdoff_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl ServoConfig {
    pub fn range(&self) -> ServoRange {
        ServoRange {
            min_angle: self.min_angle,
            max_angle: self.max_angle,
            min_pulse: self.min_pulse,
            max_pulse: self.max_pulse,
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
    /// use periphlink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
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
    /// Returns `PeriphLinkError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let radio = &self.radio;

        if radio.channel > MAX_CHANNEL {
            return Err(invalid(format!("radio channel must be between 0 and {}", MAX_CHANNEL)));
        }

        if radio.payload_size == 0 || radio.payload_size > MAX_PAYLOAD_SIZE {
            return Err(invalid(format!(
                "payload_size must be between 1 and {}",
                MAX_PAYLOAD_SIZE
            )));
        }

        if radio.payload_size < crate::radio::codec::PROBE_SIZE {
            return Err(invalid("payload_size must hold a 4-byte probe"));
        }

        if setup_aw_for(radio.address_width).is_none() {
            return Err(invalid("address_width must be between 3 and 5"));
        }

        if radio.retry_delay > MAX_RETRY_FIELD || radio.retry_count > MAX_RETRY_FIELD {
            return Err(invalid("retry_delay and retry_count must be between 0 and 15"));
        }

        for (name, pipe) in [("writing_pipe", &radio.writing_pipe), ("reading_pipe", &radio.reading_pipe)] {
            if pipe.len() != radio.address_width {
                return Err(invalid(format!(
                    "{} must be exactly {} bytes (address_width)",
                    name, radio.address_width
                )));
            }
        }

        if radio.writing_pipe == radio.reading_pipe {
            return Err(invalid("writing_pipe and reading_pipe must differ"));
        }

        if radio.spi_clock_hz == 0 || radio.spi_clock_hz > 10_000_000 {
            return Err(invalid("spi_clock_hz must be between 1 and 10000000"));
        }

        if radio.ce_pin >= self.gpio.pin_count {
            return Err(invalid("ce_pin must be a valid GPIO line"));
        }

        if let Some(irq) = radio.irq_pin {
            if irq >= self.gpio.pin_count || irq == radio.ce_pin {
                return Err(invalid("irq_pin must be a valid GPIO line other than ce_pin"));
            }
        }

        if let Some(led) = self.gpio.status_led_pin {
            if led >= self.gpio.pin_count || led == radio.ce_pin || Some(led) == radio.irq_pin {
                return Err(invalid("status_led_pin must be a free GPIO line"));
            }
        }

        let ping = &self.ping;
        if ping.timeout_ms == 0 || ping.timeout_ms > 60_000 {
            return Err(invalid("timeout_ms must be between 1 and 60000"));
        }

        if ping.interval_ms > 60_000 {
            return Err(invalid("interval_ms must be at most 60000"));
        }

        if ping.responder_holdoff_ms > 60_000 {
            return Err(invalid("responder_holdoff_ms must be at most 60000"));
        }

        if ping.poll_interval_ms == 0 || ping.poll_interval_ms > ping.timeout_ms {
            return Err(invalid("poll_interval_ms must be between 1 and timeout_ms"));
        }

        let servo = &self.servo;
        if !(24.0..=1526.0).contains(&servo.pwm_frequency_hz) {
            return Err(invalid("pwm_frequency_hz must be between 24 and 1526"));
        }

        if servo.min_angle >= servo.max_angle {
            return Err(invalid("servo min_angle must be below max_angle"));
        }

        if servo.max_pulse >= 4096 || servo.min_pulse >= 4096 {
            return Err(invalid("servo pulses must be below 4096 ticks"));
        }

        if !(0x03..=0x77).contains(&servo.i2c_address) || !(0x03..=0x77).contains(&self.expander.i2c_address) {
            return Err(invalid("i2c_address must be a 7-bit address between 0x03 and 0x77"));
        }

        if servo.enabled
            && self.expander.enabled
            && servo.i2c_bus == self.expander.i2c_bus
            && servo.i2c_address == self.expander.i2c_address
        {
            return Err(invalid("servo and expander cannot share an I2C address"));
        }

        let calibration = &self.calibration;
        if calibration.channels == 0 || calibration.channels > 16 {
            return Err(invalid("calibration channels must be between 1 and 16"));
        }

        if calibration.path.is_empty() {
            return Err(invalid("calibration path cannot be empty"));
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

        Ok(())
    }
}

fn invalid(message: impl std::fmt::Display) -> PeriphLinkError {
    PeriphLinkError::Config(toml::de::Error::custom(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.radio.writing_pipe, "1Node");
        assert_eq!(config.radio.reading_pipe, "2Node");
        assert_eq!(config.radio.role, Role::Initiator);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.radio.channel, 76);
        assert_eq!(config.ping.timeout_ms, 200);
        assert_eq!(config.gpio.status_led_pin, Some(13));
        assert!(config.logging.file_dir.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[radio]
role = "responder"
writing_pipe = "2Node"
reading_pipe = "1Node"
retry_delay = 5
irq_pin = 24

[ping]
timeout_ms = 300

[logging]
file_dir = "/tmp/periphlink"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.radio.role, Role::Responder);
        assert_eq!(config.radio.writing_pipe, "2Node");
        assert_eq!(config.radio.retry_delay, 5);
        assert_eq!(config.radio.irq_pin, Some(24));
        assert_eq!(config.ping.timeout_ms, 300);
        assert_eq!(config.ping.interval_ms, 1000);
        assert_eq!(config.logging.file_dir.as_deref(), Some("/tmp/periphlink"));
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let config = Config::load(path).unwrap();
        let defaults = Config::default();

        assert_eq!(config.radio.channel, defaults.radio.channel);
        assert_eq!(config.radio.writing_pipe, defaults.radio.writing_pipe);
        assert_eq!(config.radio.reading_pipe, defaults.radio.reading_pipe);
        assert_eq!(config.radio.irq_pin, None);
        assert_eq!(config.ping.timeout_ms, defaults.ping.timeout_ms);
        assert_eq!(config.servo.max_pulse, defaults.servo.max_pulse);
        assert_eq!(config.gpio.status_led_pin, Some(13));
        assert_eq!(config.logging.file_dir, None);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/periphlink.toml"),
            Err(PeriphLinkError::Io(_))
        ));
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(matches!(
            Config::parse("[radio]\nrole = \"observer\"\n"),
            Err(PeriphLinkError::Config(_))
        ));
    }

    #[test]
    fn test_same_pipes_rejected() {
        let mut config = create_valid_config();
        config.radio.reading_pipe = "1Node".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipe_length_must_match_width() {
        let mut config = create_valid_config();
        config.radio.writing_pipe = "Node1x".to_string();
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.radio.address_width = 3;
        config.radio.writing_pipe = "N01".to_string();
        config.radio.reading_pipe = "N02".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_address_width_bounds() {
        let mut config = create_valid_config();
        config.radio.address_width = 6;
        config.radio.writing_pipe = "1Node1".to_string();
        config.radio.reading_pipe = "2Node2".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_too_high() {
        let mut config = create_valid_config();
        config.radio.channel = 126;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_payload_size_bounds() {
        for size in [0, 3, 33] {
            let mut config = create_valid_config();
            config.radio.payload_size = size;
            assert!(config.validate().is_err(), "payload_size {} should be invalid", size);
        }
        let mut config = create_valid_config();
        config.radio.payload_size = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_bounds() {
        let mut config = create_valid_config();
        config.radio.retry_count = 16;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.radio.retry_delay = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pin_conflicts() {
        let mut config = create_valid_config();
        config.radio.irq_pin = Some(22);
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.gpio.status_led_pin = Some(22);
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.radio.ce_pin = 28;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = create_valid_config();
        config.ping.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.ping.poll_interval_ms = 201;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_bounds() {
        let mut config = create_valid_config();
        config.ping.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_servo_range_validation() {
        let mut config = create_valid_config();
        config.servo.min_angle = 180;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.servo.max_pulse = 4096;
        assert!(config.validate().is_err());

        let mut config = create_valid_config();
        config.servo.pwm_frequency_hz = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shared_i2c_address_rejected() {
        let mut config = create_valid_config();
        config.expander.i2c_address = 0x40;
        assert!(config.validate().is_err());

        config.expander.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_calibration_channels_bounds() {
        let mut config = create_valid_config();
        config.calibration.channels = 17;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telemetry_validation() {
        let mut config = create_valid_config();
        config.telemetry.log_dir = String::new();
        assert!(config.validate().is_err());

        config.telemetry.enabled = false;
        assert!(config.validate().is_ok());

        config.telemetry.max_files_to_keep = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ping_timing_conversion() {
        let timing = create_valid_config().ping.timing();
        assert_eq!(timing, PingTiming::default());
    }

    #[test]
    fn test_servo_range_conversion() {
        assert_eq!(create_valid_config().servo.range(), ServoRange::default());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_spi_clock_hz(), 8_000_000);
        assert_eq!(default_ce_pin(), 22);
        assert_eq!(default_channel(), 76);
        assert_eq!(default_payload_size(), 4);
        assert_eq!(default_address_width(), 5);
        assert_eq!(default_retry_delay(), 15);
        assert_eq!(default_retry_count(), 15);
        assert_eq!(default_timeout_ms(), 200);
        assert_eq!(default_interval_ms(), 1000);
        assert_eq!(default_responder_holdoff_ms(), 925);
        assert_eq!(default_poll_interval_ms(), 1);
        assert_eq!(default_servo_address(), 0x40);
        assert_eq!(default_expander_address(), 0x20);
        assert_eq!(default_pwm_frequency_hz(), 50.0);
        assert_eq!(default_pin_count(), 28);
        assert_eq!(default_left_angle(), 20);
        assert_eq!(default_right_angle(), 40);
        assert_eq!(default_max_records_per_file(), 10000);
        assert_eq!(default_max_files_to_keep(), 10);
    }
}
