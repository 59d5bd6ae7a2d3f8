//! # Error Types
//!
//! Custom error types for Periphlink using `thiserror`.
//!
//! Unacknowledged sends and missed echoes are not errors: the radio reports
//! them as `Ok(false)` and the ping-pong loop as `RoundTripResult::TimedOut`.

use thiserror::Error;

use crate::device::DeviceKind;
use crate::radio::RadioMode;

/// Main error type for Periphlink
#[derive(Debug, Error)]
pub enum PeriphLinkError {
    /// I/O errors from the underlying bus transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Pin index beyond the device's physical pin count
    #[error("pin {pin} is out of range for {device} ({count} pins)")]
    PinOutOfRange {
        device: &'static str,
        pin: u8,
        count: u8,
    },

    /// Write attempted on a pin that was never configured as output
    #[error("pin {pin} on {device} is not configured as output")]
    PinNotOutput { device: &'static str, pin: u8 },

    /// Pin mode the hardware cannot provide
    #[error("{device} does not support {mode:?} mode on pin {pin}")]
    UnsupportedPinMode {
        device: &'static str,
        pin: u8,
        mode: crate::device::PinMode,
    },

    /// Lookup of a device kind that was never registered
    #[error("no {0:?} device registered")]
    DeviceNotRegistered(DeviceKind),

    /// Second registration for the same device kind
    #[error("a {0:?} device is already registered")]
    DeviceAlreadyRegistered(DeviceKind),

    /// Device variant does not match the kind it was registered under
    #[error("device of kind {actual:?} cannot be registered as {expected:?}")]
    DeviceKindMismatch {
        expected: DeviceKind,
        actual: DeviceKind,
    },

    /// Shared pin state could not be locked
    #[error("pin state lock poisoned")]
    LockPoisoned,

    /// Blocking radio task panicked or was cancelled
    #[error("radio task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// Radio did not read back its configuration
    #[error("radio not responding (register {register:#04x} read {read:#04x}, expected {expected:#04x})")]
    RadioNotResponding { register: u8, read: u8, expected: u8 },

    /// Radio operation issued in the wrong mode
    #[error("radio must be {expected:?} for {operation}")]
    WrongRadioMode {
        expected: RadioMode,
        operation: &'static str,
    },

    /// Read attempted while the RX FIFO is empty
    #[error("no payload available")]
    NoPayload,

    /// Pipe number outside 0-5
    #[error("invalid pipe number {0} (must be 0-5)")]
    InvalidPipe(u8),

    /// Pipe address of the wrong length
    #[error("invalid pipe address length {len} (expected {expected})")]
    InvalidAddress { len: usize, expected: usize },

    /// Retry delay or count outside 0-15
    #[error("invalid retry policy: delay {delay}, count {count} (both must be 0-15)")]
    InvalidRetryPolicy { delay: u8, count: u8 },

    /// RF channel outside 0-125
    #[error("invalid RF channel {0} (must be 0-125)")]
    InvalidChannel(u8),

    /// Payload does not fit the configured static payload size
    #[error("payload of {len} bytes exceeds payload size {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Received payload shorter than a probe
    #[error("payload too short: {0} bytes")]
    PayloadTooShort(usize),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Preference file could not be serialized
    #[error("Configuration write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Malformed calibration preferences
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Telemetry serialization errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] serde_json::Error),
}

/// Result type alias for Periphlink
pub type Result<T> = std::result::Result<T, PeriphLinkError>;
