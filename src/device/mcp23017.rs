//! # MCP23017 I/O Expander
//!
//! 16-bit I2C port expander. Pins 0-7 map to port A, 8-15 to port B; the
//! driver assumes the power-on register layout (IOCON.BANK = 0).

use tracing::debug;

use super::{PinIo, PinMode, PinModes, PinState};
use crate::bus::I2cBus;
use crate::error::Result;

/// Default I2C address (A2..A0 low)
pub const MCP23017_ADDRESS: u8 = 0x20;

/// Number of I/O pins
pub const MCP23017_PINS: u8 = 16;

const IODIRA: u8 = 0x00;
const GPPUA: u8 = 0x0C;
const GPIOA: u8 = 0x12;
const OLATA: u8 = 0x14;

/// Register address and bit mask for `pin` in the A/B register pair at `base`
fn locate(base: u8, pin: u8) -> (u8, u8) {
    (base + pin / 8, 1 << (pin % 8))
}

/// MCP23017 driver
pub struct Mcp23017 {
    bus: Box<dyn I2cBus>,
    address: u8,
    modes: PinModes,
}

impl std::fmt::Debug for Mcp23017 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcp23017")
            .field("address", &format_args!("{:#04x}", self.address))
            .finish_non_exhaustive()
    }
}

impl Mcp23017 {
    pub fn new(bus: Box<dyn I2cBus>, address: u8) -> Self {
        Self {
            bus,
            address,
            modes: PinModes::new("MCP23017", MCP23017_PINS),
        }
    }

    /// Enable or disable the internal 100 kΩ pull-up of `pin`
    pub fn set_pull_up(&mut self, pin: u8, enabled: bool) -> Result<()> {
        self.modes.check(pin)?;
        let (register, mask) = locate(GPPUA, pin);
        self.update_bit(register, mask, enabled)
    }

    fn update_bit(&mut self, register: u8, mask: u8, set: bool) -> Result<()> {
        let current = self.read_register(register)?;
        let value = if set { current | mask } else { current & !mask };
        if value != current {
            self.bus.write(self.address, &[register, value])?;
        }
        Ok(())
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.bus.write_read(self.address, &[register], &mut buf)?;
        Ok(buf[0])
    }
}

impl PinIo for Mcp23017 {
    fn pin_count(&self) -> u8 {
        MCP23017_PINS
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        self.modes.check(pin)?;
        let (register, mask) = locate(IODIRA, pin);
        // IODIR bit set = input
        self.update_bit(register, mask, mode == PinMode::Input)?;
        self.modes.set(pin, mode)?;
        debug!("MCP23017 pin {} set to {:?}", pin, mode);
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, state: PinState) -> Result<()> {
        self.modes.check_output(pin)?;
        let (register, mask) = locate(OLATA, pin);
        self.update_bit(register, mask, state.is_high())
    }

    fn read_pin(&mut self, pin: u8) -> Result<PinState> {
        self.modes.check(pin)?;
        let (register, mask) = locate(GPIOA, pin);
        Ok(PinState::from(self.read_register(register)? & mask != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::SimI2c;
    use crate::bus::MockI2cBus;
    use crate::error::PeriphLinkError;
    use std::io;

    fn sim_expander() -> (Mcp23017, SimI2c) {
        let sim = SimI2c::new();
        sim.set_register(MCP23017_ADDRESS, IODIRA, 0xFF);
        sim.set_register(MCP23017_ADDRESS, IODIRA + 1, 0xFF);
        (Mcp23017::new(Box::new(sim.clone()), MCP23017_ADDRESS), sim)
    }

    #[test]
    fn test_locate_ports() {
        assert_eq!(locate(IODIRA, 0), (0x00, 0x01));
        assert_eq!(locate(IODIRA, 7), (0x00, 0x80));
        assert_eq!(locate(IODIRA, 8), (0x01, 0x01));
        assert_eq!(locate(OLATA, 15), (0x15, 0x80));
    }

    #[test]
    fn test_output_mode_clears_iodir_bit() {
        let (mut expander, sim) = sim_expander();
        expander.set_pin_mode(6, PinMode::Output).unwrap();
        expander.set_pin_mode(9, PinMode::Output).unwrap();

        assert_eq!(sim.register(MCP23017_ADDRESS, IODIRA), 0xBF);
        assert_eq!(sim.register(MCP23017_ADDRESS, IODIRA + 1), 0xFD);
    }

    #[test]
    fn test_write_pin_updates_latch() {
        let (mut expander, sim) = sim_expander();
        for pin in [6, 7, 8] {
            expander.set_pin_mode(pin, PinMode::Output).unwrap();
            expander.write_pin(pin, PinState::High).unwrap();
        }
        expander.write_pin(7, PinState::Low).unwrap();

        assert_eq!(sim.register(MCP23017_ADDRESS, OLATA), 0x40);
        assert_eq!(sim.register(MCP23017_ADDRESS, OLATA + 1), 0x01);
    }

    #[test]
    fn test_write_before_mode_is_rejected() {
        let (mut expander, sim) = sim_expander();
        let err = expander.write_pin(13, PinState::Low).unwrap_err();
        assert!(matches!(err, PeriphLinkError::PinNotOutput { pin: 13, .. }));
        assert_eq!(sim.register(MCP23017_ADDRESS, OLATA + 1), 0x00);
    }

    #[test]
    fn test_read_pin_samples_gpio_register() {
        let (mut expander, sim) = sim_expander();
        sim.set_register(MCP23017_ADDRESS, GPIOA, 0x01);
        expander.set_pin_mode(0, PinMode::Input).unwrap();
        expander.set_pin_mode(1, PinMode::Input).unwrap();

        assert_eq!(expander.read_pin(0).unwrap(), PinState::High);
        assert_eq!(expander.read_pin(1).unwrap(), PinState::Low);
    }

    #[test]
    fn test_pull_up() {
        let (mut expander, sim) = sim_expander();
        expander.set_pull_up(0, true).unwrap();
        expander.set_pull_up(12, true).unwrap();
        expander.set_pull_up(0, false).unwrap();

        assert_eq!(sim.register(MCP23017_ADDRESS, GPPUA), 0x00);
        assert_eq!(sim.register(MCP23017_ADDRESS, GPPUA + 1), 0x10);
        assert!(expander.set_pull_up(16, true).is_err());
    }

    #[test]
    fn test_transport_error_propagates() {
        let mut bus = MockI2cBus::new();
        bus.expect_write_read()
            .returning(|_, _, _| Err(io::Error::new(io::ErrorKind::TimedOut, "nack")));
        let mut expander = Mcp23017::new(Box::new(bus), MCP23017_ADDRESS);

        let err = expander.set_pin_mode(0, PinMode::Output).unwrap_err();
        assert!(matches!(err, PeriphLinkError::Io(_)));
    }
}
