//! # Peripheral Device Module
//!
//! One pin-level capability set over every peripheral driver.
//!
//! This module handles:
//! - The shared [`PinIo`] contract (mode, write, read)
//! - Per-pin mode bookkeeping shared by all drivers
//! - The closed set of device variants held by the [`DeviceRegistry`]
//!
//! Kind-specific operations (servo angles, pull-ups) live on the concrete
//! driver types and are reached through the registry's typed accessors, so
//! they are checked at compile time instead of by downcasting.

pub mod gpio;
pub mod mcp23017;
pub mod pca9685;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::error::{PeriphLinkError, Result};

pub use gpio::{GpioDevice, GpioLine, RadioPins, DEFAULT_GPIO_PIN_COUNT};
pub use mcp23017::Mcp23017;
pub use pca9685::Pca9685;
pub use registry::DeviceRegistry;

/// Registry key for each kind of peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    ServoController,
    IoExpander,
    GenericGpio,
    Radio,
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinMode {
    Input,
    Output,
}

/// Logic level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinState {
    Low,
    High,
}

impl PinState {
    /// The opposite level
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            PinState::Low => PinState::High,
            PinState::High => PinState::Low,
        }
    }

    pub fn is_high(self) -> bool {
        self == PinState::High
    }
}

impl From<bool> for PinState {
    fn from(high: bool) -> Self {
        if high {
            PinState::High
        } else {
            PinState::Low
        }
    }
}

/// Pin-level capability set implemented by every peripheral driver
///
/// Pin indices are local to the device (`0..pin_count()`).
pub trait PinIo {
    /// Number of physical pins on the device
    fn pin_count(&self) -> u8;

    /// Configure a pin's direction
    ///
    /// # Errors
    ///
    /// `PinOutOfRange` for a pin beyond `pin_count()`, `UnsupportedPinMode`
    /// if the hardware cannot provide `mode`, or a transport error.
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()>;

    /// Drive a pin configured as output
    ///
    /// # Errors
    ///
    /// `PinNotOutput` if the pin was not configured as output, or a
    /// transport error.
    fn write_pin(&mut self, pin: u8, state: PinState) -> Result<()>;

    /// Sample a pin
    ///
    /// Every driver in this crate can reflect the driven level of its output
    /// pins, so reads are allowed in either mode.
    fn read_pin(&mut self, pin: u8) -> Result<PinState>;
}

/// Mode table for a device's pins
///
/// Pins start unconfigured; a write is only legal after the pin was set to
/// [`PinMode::Output`].
#[derive(Debug, Clone)]
pub struct PinModes {
    device: &'static str,
    modes: Vec<Option<PinMode>>,
}

impl PinModes {
    pub fn new(device: &'static str, count: u8) -> Self {
        Self {
            device,
            modes: vec![None; usize::from(count)],
        }
    }

    pub fn count(&self) -> u8 {
        self.modes.len() as u8
    }

    /// Fail with `PinOutOfRange` unless `pin` exists
    pub fn check(&self, pin: u8) -> Result<()> {
        if usize::from(pin) >= self.modes.len() {
            return Err(PeriphLinkError::PinOutOfRange {
                device: self.device,
                pin,
                count: self.count(),
            });
        }
        Ok(())
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.modes.get(usize::from(pin)).copied().flatten()
    }

    pub fn set(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        self.check(pin)?;
        self.modes[usize::from(pin)] = Some(mode);
        Ok(())
    }

    /// Fail unless `pin` exists and is configured as output
    pub fn check_output(&self, pin: u8) -> Result<()> {
        self.check(pin)?;
        match self.mode(pin) {
            Some(PinMode::Output) => Ok(()),
            _ => Err(PeriphLinkError::PinNotOutput {
                device: self.device,
                pin,
            }),
        }
    }
}

/// The closed set of peripherals a registry can own
pub enum PeripheralDevice {
    ServoController(Pca9685),
    IoExpander(Mcp23017),
    GenericGpio(GpioDevice),
    Radio(RadioPins),
}

impl PeripheralDevice {
    pub fn kind(&self) -> DeviceKind {
        match self {
            PeripheralDevice::ServoController(_) => DeviceKind::ServoController,
            PeripheralDevice::IoExpander(_) => DeviceKind::IoExpander,
            PeripheralDevice::GenericGpio(_) => DeviceKind::GenericGpio,
            PeripheralDevice::Radio(_) => DeviceKind::Radio,
        }
    }

    fn pins(&self) -> &dyn PinIo {
        match self {
            PeripheralDevice::ServoController(d) => d,
            PeripheralDevice::IoExpander(d) => d,
            PeripheralDevice::GenericGpio(d) => d,
            PeripheralDevice::Radio(d) => d,
        }
    }

    fn pins_mut(&mut self) -> &mut dyn PinIo {
        match self {
            PeripheralDevice::ServoController(d) => d,
            PeripheralDevice::IoExpander(d) => d,
            PeripheralDevice::GenericGpio(d) => d,
            PeripheralDevice::Radio(d) => d,
        }
    }
}

impl std::fmt::Debug for PeripheralDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralDevice")
            .field("kind", &self.kind())
            .field("pin_count", &self.pin_count())
            .finish_non_exhaustive()
    }
}

impl PinIo for PeripheralDevice {
    fn pin_count(&self) -> u8 {
        self.pins().pin_count()
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        self.pins_mut().set_pin_mode(pin, mode)
    }

    fn write_pin(&mut self, pin: u8, state: PinState) -> Result<()> {
        self.pins_mut().write_pin(pin, state)
    }

    fn read_pin(&mut self, pin: u8) -> Result<PinState> {
        self.pins_mut().read_pin(pin)
    }
}

impl From<Pca9685> for PeripheralDevice {
    fn from(device: Pca9685) -> Self {
        PeripheralDevice::ServoController(device)
    }
}

impl From<Mcp23017> for PeripheralDevice {
    fn from(device: Mcp23017) -> Self {
        PeripheralDevice::IoExpander(device)
    }
}

impl From<GpioDevice> for PeripheralDevice {
    fn from(device: GpioDevice) -> Self {
        PeripheralDevice::GenericGpio(device)
    }
}

impl From<RadioPins> for PeripheralDevice {
    fn from(device: RadioPins) -> Self {
        PeripheralDevice::Radio(device)
    }
}
