//! # Raspberry Pi Transports
//!
//! I2C, SPI and GPIO access through `rppal`.
//!
//! ## Default wiring
//!
//! ```text
//! Device     │ Bus        │ Lines
//! ───────────┼────────────┼──────────────────────────
//! PCA9685    │ I2C1       │ SDA GPIO 2, SCL GPIO 3
//! MCP23017   │ I2C1       │ SDA GPIO 2, SCL GPIO 3
//! nRF24L01+  │ SPI0 CE0   │ CE GPIO 22, IRQ optional
//! ```

use std::collections::HashMap;
use std::io;

use rppal::gpio::{Gpio, IoPin, Level, Mode};
use rppal::i2c::I2c;
use rppal::spi::{Bus, SlaveSelect, Spi};
use tracing::debug;

use super::{GpioBus, I2cBus, SpiBus};
use crate::device::{PinMode, PinState};

/// I2C bus through `/dev/i2c-N`
pub struct RpiI2c {
    i2c: I2c,
    slave: Option<u8>,
}

impl RpiI2c {
    /// Open I2C bus `bus` (1 on every current Pi header)
    pub fn open(bus: u8) -> io::Result<Self> {
        let i2c = I2c::with_bus(bus).map_err(io::Error::other)?;
        debug!("Opened I2C bus {}", bus);
        Ok(Self { i2c, slave: None })
    }

    fn select(&mut self, address: u8) -> io::Result<()> {
        if self.slave != Some(address) {
            self.i2c.set_slave_address(u16::from(address)).map_err(io::Error::other)?;
            self.slave = Some(address);
        }
        Ok(())
    }
}

impl I2cBus for RpiI2c {
    fn write(&mut self, address: u8, data: &[u8]) -> io::Result<()> {
        self.select(address)?;
        let written = self.i2c.write(data).map_err(io::Error::other)?;
        if written != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short I2C write: {} of {} bytes", written, data.len()),
            ));
        }
        Ok(())
    }

    fn write_read(&mut self, address: u8, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        self.select(address)?;
        self.i2c.write_read(write, read).map_err(io::Error::other)
    }
}

/// SPI bus through `/dev/spidevB.S`
pub struct RpiSpi {
    spi: Spi,
}

impl RpiSpi {
    /// Open SPI `bus` with chip select 0 in mode 0
    pub fn open(bus: u8, clock_hz: u32) -> io::Result<Self> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other_bus => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported SPI bus {}", other_bus),
                ))
            }
        };
        let spi = Spi::new(bus, SlaveSelect::Ss0, clock_hz, rppal::spi::Mode::Mode0).map_err(io::Error::other)?;
        debug!("Opened SPI bus {:?} at {} Hz", bus, clock_hz);
        Ok(Self { spi })
    }
}

impl SpiBus for RpiSpi {
    fn transfer(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let write = buf.to_vec();
        self.spi.transfer(buf, &write).map_err(io::Error::other)?;
        Ok(())
    }
}

/// Host GPIO lines, acquired lazily on first use
pub struct RpiGpio {
    gpio: Gpio,
    pins: HashMap<u8, IoPin>,
}

impl RpiGpio {
    pub fn open() -> io::Result<Self> {
        Ok(Self {
            gpio: Gpio::new().map_err(io::Error::other)?,
            pins: HashMap::new(),
        })
    }

    fn pin(&mut self, pin: u8) -> io::Result<&mut IoPin> {
        if !self.pins.contains_key(&pin) {
            let io_pin = self.gpio.get(pin).map_err(io::Error::other)?.into_io(Mode::Input);
            self.pins.insert(pin, io_pin);
        }
        self.pins
            .get_mut(&pin)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("GPIO {} unavailable", pin)))
    }
}

impl GpioBus for RpiGpio {
    fn set_direction(&mut self, pin: u8, mode: PinMode) -> io::Result<()> {
        let io_pin = self.pin(pin)?;
        io_pin.set_mode(match mode {
            PinMode::Input => Mode::Input,
            PinMode::Output => Mode::Output,
        });
        Ok(())
    }

    fn write(&mut self, pin: u8, state: PinState) -> io::Result<()> {
        let io_pin = self.pin(pin)?;
        io_pin.write(match state {
            PinState::Low => Level::Low,
            PinState::High => Level::High,
        });
        Ok(())
    }

    fn read(&mut self, pin: u8) -> io::Result<PinState> {
        let io_pin = self.pin(pin)?;
        Ok(match io_pin.read() {
            Level::Low => PinState::Low,
            Level::High => PinState::High,
        })
    }
}
