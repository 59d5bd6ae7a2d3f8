//! # Device Registry
//!
//! Explicit context object mapping each [`DeviceKind`] to the one driver of
//! that kind. Built once at startup and handed to whatever needs devices.
//!
//! A kind can be registered once. Registering it again is a startup bug and
//! fails; [`DeviceRegistry::replace`] is the explicit overwrite and hands the
//! previous device back so the caller can release it.

use std::collections::HashMap;

use tracing::{debug, info};

use super::{DeviceKind, GpioDevice, Mcp23017, Pca9685, PeripheralDevice, RadioPins};
use crate::error::{PeriphLinkError, Result};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceKind, PeripheralDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `device` under `kind`
    ///
    /// # Errors
    ///
    /// `DeviceKindMismatch` if `device` is not a `kind` device,
    /// `DeviceAlreadyRegistered` if `kind` already has an entry.
    pub fn register(&mut self, kind: DeviceKind, device: impl Into<PeripheralDevice>) -> Result<()> {
        let device = device.into();
        Self::check_kind(kind, &device)?;
        if self.devices.contains_key(&kind) {
            return Err(PeriphLinkError::DeviceAlreadyRegistered(kind));
        }
        info!("Registered {:?} device", kind);
        self.devices.insert(kind, device);
        Ok(())
    }

    /// Store `device` under `kind`, returning the device it displaces
    pub fn replace(
        &mut self,
        kind: DeviceKind,
        device: impl Into<PeripheralDevice>,
    ) -> Result<Option<PeripheralDevice>> {
        let device = device.into();
        Self::check_kind(kind, &device)?;
        let previous = self.devices.insert(kind, device);
        if previous.is_some() {
            debug!("Replaced {:?} device", kind);
        }
        Ok(previous)
    }

    pub fn get(&self, kind: DeviceKind) -> Option<&PeripheralDevice> {
        self.devices.get(&kind)
    }

    pub fn get_mut(&mut self, kind: DeviceKind) -> Option<&mut PeripheralDevice> {
        self.devices.get_mut(&kind)
    }

    /// Like [`DeviceRegistry::get_mut`], failing fast when nothing is registered
    pub fn require(&mut self, kind: DeviceKind) -> Result<&mut PeripheralDevice> {
        self.devices
            .get_mut(&kind)
            .ok_or(PeriphLinkError::DeviceNotRegistered(kind))
    }

    pub fn contains(&self, kind: DeviceKind) -> bool {
        self.devices.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn servo_mut(&mut self) -> Result<&mut Pca9685> {
        match self.require(DeviceKind::ServoController)? {
            PeripheralDevice::ServoController(servo) => Ok(servo),
            other => Err(Self::mismatch(DeviceKind::ServoController, other)),
        }
    }

    pub fn expander_mut(&mut self) -> Result<&mut Mcp23017> {
        match self.require(DeviceKind::IoExpander)? {
            PeripheralDevice::IoExpander(expander) => Ok(expander),
            other => Err(Self::mismatch(DeviceKind::IoExpander, other)),
        }
    }

    pub fn gpio_mut(&mut self) -> Result<&mut GpioDevice> {
        match self.require(DeviceKind::GenericGpio)? {
            PeripheralDevice::GenericGpio(gpio) => Ok(gpio),
            other => Err(Self::mismatch(DeviceKind::GenericGpio, other)),
        }
    }

    pub fn radio_pins_mut(&mut self) -> Result<&mut RadioPins> {
        match self.require(DeviceKind::Radio)? {
            PeripheralDevice::Radio(pins) => Ok(pins),
            other => Err(Self::mismatch(DeviceKind::Radio, other)),
        }
    }

    fn check_kind(kind: DeviceKind, device: &PeripheralDevice) -> Result<()> {
        if device.kind() != kind {
            return Err(Self::mismatch(kind, device));
        }
        Ok(())
    }

    fn mismatch(expected: DeviceKind, device: &PeripheralDevice) -> PeriphLinkError {
        PeriphLinkError::DeviceKindMismatch {
            expected,
            actual: device.kind(),
        }
    }
}
