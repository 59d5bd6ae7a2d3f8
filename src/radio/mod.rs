//! # Radio Module
//!
//! nRF24L01+ packet radio link and the probe payload format.
//!
//! This module handles:
//! - Register map and SPI command set of the transceiver
//! - Pipe addressing, retransmit policy and Listening/Transmitting modes
//! - 4-byte timestamp payload encoding
//! - An in-memory air interface for tests and the simulated demo

pub mod codec;
pub mod registers;
pub mod rf24;
pub mod sim;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use rf24::{RetryPolicy, Rf24, TxObservation};

/// Transceiver mode; the radio is always in exactly one of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioMode {
    /// PRIM_RX set, CE high: receiving into the RX FIFO
    Listening,
    /// PRIM_RX clear: ready to send
    Transmitting,
}

/// Send/receive primitives the ping-pong protocol runs on
#[cfg_attr(test, mockall::automock)]
pub trait RadioLink: Send {
    /// Enter [`RadioMode::Listening`]
    fn start_listening(&mut self) -> Result<()>;

    /// Enter [`RadioMode::Transmitting`]
    fn stop_listening(&mut self) -> Result<()>;

    /// Whether an unread payload is waiting (non-blocking)
    fn available(&mut self) -> Result<bool>;

    /// Send one payload; `Ok(false)` when it was not acknowledged after the
    /// configured retransmits
    fn write(&mut self, payload: &[u8]) -> Result<bool>;

    /// Pop the oldest payload and return its first `len` bytes
    fn read(&mut self, len: usize) -> Result<Vec<u8>>;
}
