//! # Host GPIO Device
//!
//! Plain GPIO lines of the host board, plus the borrowed-line handles other
//! drivers use for their control pins.
//!
//! A [`GpioDevice`] is a cheap handle: clones share the same bus and mode
//! table. The registry owns the device; the radio keeps a [`GpioLine`] for
//! its chip-enable pin, which borrows the line without owning the bus.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::{PinIo, PinMode, PinModes, PinState};
use crate::bus::GpioBus;
use crate::error::{PeriphLinkError, Result};

/// BCM GPIO lines exposed on the 40-pin Raspberry Pi header
pub const DEFAULT_GPIO_PIN_COUNT: u8 = 28;

struct GpioShared {
    bus: Box<dyn GpioBus>,
    modes: PinModes,
}

/// Generic GPIO device over a host [`GpioBus`]
#[derive(Clone)]
pub struct GpioDevice {
    shared: Arc<Mutex<GpioShared>>,
    pin_count: u8,
}

impl std::fmt::Debug for GpioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioDevice")
            .field("pin_count", &self.pin_count)
            .finish_non_exhaustive()
    }
}

impl GpioDevice {
    pub fn new(bus: Box<dyn GpioBus>, pin_count: u8) -> Self {
        Self {
            shared: Arc::new(Mutex::new(GpioShared {
                bus,
                modes: PinModes::new("GPIO", pin_count),
            })),
            pin_count,
        }
    }

    /// Borrow a single line, e.g. a chip-enable pin for another driver
    ///
    /// # Errors
    ///
    /// `PinOutOfRange` if `pin` does not exist on this device.
    pub fn line(&self, pin: u8) -> Result<GpioLine> {
        self.lock()?.modes.check(pin)?;
        Ok(GpioLine {
            device: self.clone(),
            pin,
        })
    }

    /// Configured mode of `pin`, if any
    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.lock().ok().and_then(|shared| shared.modes.mode(pin))
    }

    fn lock(&self) -> Result<MutexGuard<'_, GpioShared>> {
        self.shared.lock().map_err(|_| PeriphLinkError::LockPoisoned)
    }
}

impl PinIo for GpioDevice {
    fn pin_count(&self) -> u8 {
        self.pin_count
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        let mut shared = self.lock()?;
        shared.modes.check(pin)?;
        shared.bus.set_direction(pin, mode)?;
        shared.modes.set(pin, mode)?;
        debug!("GPIO {} set to {:?}", pin, mode);
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, state: PinState) -> Result<()> {
        let mut shared = self.lock()?;
        shared.modes.check_output(pin)?;
        shared.bus.write(pin, state)?;
        Ok(())
    }

    fn read_pin(&mut self, pin: u8) -> Result<PinState> {
        let mut shared = self.lock()?;
        shared.modes.check(pin)?;
        Ok(shared.bus.read(pin)?)
    }
}

/// One borrowed line of a [`GpioDevice`]
#[derive(Debug, Clone)]
pub struct GpioLine {
    device: GpioDevice,
    pin: u8,
}

impl GpioLine {
    /// Host pin number of this line
    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        self.device.set_pin_mode(self.pin, mode)
    }

    pub fn write(&mut self, state: PinState) -> Result<()> {
        self.device.write_pin(self.pin, state)
    }

    pub fn read(&mut self) -> Result<PinState> {
        self.device.read_pin(self.pin)
    }
}

/// Local pin index of the radio's chip-enable line
pub const RADIO_PIN_CE: u8 = 0;

/// Local pin index of the radio's active-low interrupt line
pub const RADIO_PIN_IRQ: u8 = 1;

/// Control lines of the nRF24L01+ radio, borrowed from the host GPIO
///
/// Pin 0 is CE (output), pin 1 the optional IRQ line (input, active low).
#[derive(Debug, Clone)]
pub struct RadioPins {
    ce: GpioLine,
    irq: Option<GpioLine>,
}

impl RadioPins {
    /// Claim the CE and optional IRQ lines and put them in their idle state
    ///
    /// # Errors
    ///
    /// Transport errors while configuring the lines.
    pub fn new(mut ce: GpioLine, irq: Option<GpioLine>) -> Result<Self> {
        ce.set_mode(PinMode::Output)?;
        ce.write(PinState::Low)?;
        let irq = match irq {
            Some(mut line) => {
                line.set_mode(PinMode::Input)?;
                Some(line)
            }
            None => None,
        };
        Ok(Self { ce, irq })
    }

    /// Drive the chip-enable line
    pub fn set_ce(&mut self, state: PinState) -> Result<()> {
        self.ce.write(state)
    }

    /// Whether the IRQ line is asserted (low); `None` when it is not wired
    pub fn irq_asserted(&mut self) -> Result<Option<bool>> {
        match self.irq.as_mut() {
            Some(line) => Ok(Some(line.read()? == PinState::Low)),
            None => Ok(None),
        }
    }

    fn line(&mut self, pin: u8) -> Result<&mut GpioLine> {
        let count = self.pin_count();
        match pin {
            RADIO_PIN_CE => Ok(&mut self.ce),
            RADIO_PIN_IRQ if self.irq.is_some() => self
                .irq
                .as_mut()
                .ok_or(PeriphLinkError::PinOutOfRange { device: "radio", pin, count }),
            _ => Err(PeriphLinkError::PinOutOfRange {
                device: "radio",
                pin,
                count,
            }),
        }
    }
}

impl PinIo for RadioPins {
    fn pin_count(&self) -> u8 {
        if self.irq.is_some() {
            2
        } else {
            1
        }
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        let expected = if pin == RADIO_PIN_CE {
            PinMode::Output
        } else {
            PinMode::Input
        };
        let line = self.line(pin)?;
        if mode != expected {
            return Err(PeriphLinkError::UnsupportedPinMode {
                device: "radio",
                pin,
                mode,
            });
        }
        line.set_mode(mode)
    }

    fn write_pin(&mut self, pin: u8, state: PinState) -> Result<()> {
        self.line(pin)?.write(state)
    }

    fn read_pin(&mut self, pin: u8) -> Result<PinState> {
        self.line(pin)?.read()
    }
}
