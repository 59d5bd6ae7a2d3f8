//! # Periphlink Library
//!
//! Drive heterogeneous peripherals (PCA9685 servo controller, MCP23017 I/O
//! expander, host GPIO lines, nRF24L01+ radio) behind one pin-level
//! capability set, and measure radio link quality with a ping-pong
//! round-trip probe.
//!
//! Every driver takes its bus transport at construction. The Raspberry Pi
//! transports are behind the `raspberry-pi` feature; the in-memory ones in
//! [`bus::sim`] and [`radio::sim`] run anywhere.

pub mod bus;
pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
pub mod ping;
pub mod radio;
pub mod telemetry;
