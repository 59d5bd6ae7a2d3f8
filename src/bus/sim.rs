//! In-memory buses for tests and the simulated demo.
//!
//! Both types are cheap handles over shared state, so a test can keep one
//! clone to inspect or disturb the bus while a driver owns another.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use super::{GpioBus, I2cBus};
use crate::device::{PinMode, PinState};

#[derive(Debug, Default)]
struct GpioLines {
    directions: HashMap<u8, PinMode>,
    levels: HashMap<u8, PinState>,
    fault: Option<io::ErrorKind>,
}

/// Simulated host GPIO lines
///
/// Output lines read back the level last written; input lines read whatever
/// a test drives onto them with [`SimGpio::drive`].
#[derive(Debug, Clone, Default)]
pub struct SimGpio {
    lines: Arc<Mutex<GpioLines>>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level of a line (Low if never touched)
    pub fn level(&self, pin: u8) -> PinState {
        self.lock()
            .map(|lines| lines.levels.get(&pin).copied().unwrap_or(PinState::Low))
            .unwrap_or(PinState::Low)
    }

    /// Configured direction of a line, if any
    pub fn direction(&self, pin: u8) -> Option<PinMode> {
        self.lock().ok().and_then(|lines| lines.directions.get(&pin).copied())
    }

    /// Drive an external level onto a line
    pub fn drive(&self, pin: u8, state: PinState) {
        if let Ok(mut lines) = self.lock() {
            lines.levels.insert(pin, state);
        }
    }

    /// Make every following bus call fail with `kind` (None clears it)
    pub fn set_fault(&self, kind: Option<io::ErrorKind>) {
        if let Ok(mut lines) = self.lock() {
            lines.fault = kind;
        }
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, GpioLines>> {
        self.lines
            .lock()
            .map_err(|_| io::Error::other("simulated GPIO poisoned"))
    }

    fn checked(&self) -> io::Result<std::sync::MutexGuard<'_, GpioLines>> {
        let lines = self.lock()?;
        if let Some(kind) = lines.fault {
            return Err(io::Error::new(kind, "simulated GPIO fault"));
        }
        Ok(lines)
    }
}

impl GpioBus for SimGpio {
    fn set_direction(&mut self, pin: u8, mode: PinMode) -> io::Result<()> {
        self.checked()?.directions.insert(pin, mode);
        Ok(())
    }

    fn write(&mut self, pin: u8, state: PinState) -> io::Result<()> {
        self.checked()?.levels.insert(pin, state);
        Ok(())
    }

    fn read(&mut self, pin: u8) -> io::Result<PinState> {
        let lines = self.checked()?;
        Ok(lines.levels.get(&pin).copied().unwrap_or(PinState::Low))
    }
}

/// Simulated I2C bus of plain register files
///
/// Writes store bytes starting at the register named by the first byte and
/// auto-increment, which matches the PCA9685 (with AI set) and the
/// MCP23017 (BANK = 0, SEQOP enabled).
#[derive(Debug, Clone, Default)]
pub struct SimI2c {
    registers: Arc<Mutex<HashMap<(u8, u8), u8>>>,
}

impl SimI2c {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register value at `address`/`register` (0 if never written)
    pub fn register(&self, address: u8, register: u8) -> u8 {
        self.registers
            .lock()
            .map(|regs| regs.get(&(address, register)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Preload a register, e.g. an input port level
    pub fn set_register(&self, address: u8, register: u8, value: u8) {
        if let Ok(mut regs) = self.registers.lock() {
            regs.insert((address, register), value);
        }
    }
}

impl I2cBus for SimI2c {
    fn write(&mut self, address: u8, data: &[u8]) -> io::Result<()> {
        let Some((&start, values)) = data.split_first() else {
            return Ok(());
        };
        let mut regs = self
            .registers
            .lock()
            .map_err(|_| io::Error::other("simulated I2C poisoned"))?;
        for (offset, &value) in values.iter().enumerate() {
            regs.insert((address, start.wrapping_add(offset as u8)), value);
        }
        Ok(())
    }

    fn write_read(&mut self, address: u8, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        let start = write.first().copied().unwrap_or(0);
        let regs = self
            .registers
            .lock()
            .map_err(|_| io::Error::other("simulated I2C poisoned"))?;
        for (offset, byte) in read.iter_mut().enumerate() {
            *byte = regs
                .get(&(address, start.wrapping_add(offset as u8)))
                .copied()
                .unwrap_or(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_gpio_reads_back_written_level() {
        let mut gpio = SimGpio::new();
        gpio.set_direction(4, PinMode::Output).unwrap();
        gpio.write(4, PinState::High).unwrap();

        assert_eq!(gpio.read(4).unwrap(), PinState::High);
        assert_eq!(gpio.direction(4), Some(PinMode::Output));
    }

    #[test]
    fn test_sim_gpio_clones_share_lines() {
        let mut gpio = SimGpio::new();
        let observer = gpio.clone();

        gpio.write(7, PinState::High).unwrap();
        assert_eq!(observer.level(7), PinState::High);

        observer.drive(7, PinState::Low);
        assert_eq!(gpio.read(7).unwrap(), PinState::Low);
    }

    #[test]
    fn test_sim_gpio_fault_injection() {
        let mut gpio = SimGpio::new();
        gpio.set_fault(Some(io::ErrorKind::BrokenPipe));

        let err = gpio.read(1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        gpio.set_fault(None);
        assert!(gpio.read(1).is_ok());
    }

    #[test]
    fn test_sim_i2c_auto_increment() {
        let mut bus = SimI2c::new();
        bus.write(0x40, &[0x06, 0x01, 0x02, 0x03]).unwrap();

        assert_eq!(bus.register(0x40, 0x06), 0x01);
        assert_eq!(bus.register(0x40, 0x08), 0x03);

        let mut buf = [0u8; 2];
        bus.write_read(0x40, &[0x07], &mut buf).unwrap();
        assert_eq!(buf, [0x02, 0x03]);
    }

    #[test]
    fn test_sim_i2c_addresses_are_separate() {
        let mut bus = SimI2c::new();
        bus.write(0x20, &[0x00, 0xAA]).unwrap();

        assert_eq!(bus.register(0x20, 0x00), 0xAA);
        assert_eq!(bus.register(0x21, 0x00), 0x00);
    }
}
