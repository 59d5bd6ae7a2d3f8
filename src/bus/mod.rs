//! # Bus Transport Module
//!
//! Trait seams over the physical buses the peripheral drivers sit on.
//!
//! This module handles:
//! - I2C register access for the PCA9685 and MCP23017 chips
//! - Full-duplex SPI transfers for the nRF24L01+ radio
//! - Direction, level and readback of host GPIO lines
//!
//! The transports themselves belong to the host platform. Drivers receive
//! them boxed at construction, which keeps the drivers testable against
//! mocks and the simulated buses in [`sim`].

use std::io;

use crate::device::{PinMode, PinState};

pub mod sim;

#[cfg(feature = "raspberry-pi")]
pub mod rpi;

/// I2C master access to a 7-bit addressed device
#[cfg_attr(test, mockall::automock)]
pub trait I2cBus: Send {
    /// Write `data` to the device at `address`
    fn write(&mut self, address: u8, data: &[u8]) -> io::Result<()>;

    /// Write `write` then read `read.len()` bytes with a repeated start
    fn write_read(&mut self, address: u8, write: &[u8], read: &mut [u8]) -> io::Result<()>;
}

/// SPI master with chip select handled by the bus
#[cfg_attr(test, mockall::automock)]
pub trait SpiBus: Send {
    /// Clock `buf` out and replace its contents with the bytes clocked in
    fn transfer(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Host GPIO lines addressed by number
#[cfg_attr(test, mockall::automock)]
pub trait GpioBus: Send {
    /// Configure the line direction
    fn set_direction(&mut self, pin: u8, mode: PinMode) -> io::Result<()>;

    /// Drive an output line
    fn write(&mut self, pin: u8, state: PinState) -> io::Result<()>;

    /// Sample the line level
    fn read(&mut self, pin: u8) -> io::Result<PinState>;
}

impl<T: SpiBus + ?Sized> SpiBus for Box<T> {
    fn transfer(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).transfer(buf)
    }
}
