//! # PCA9685 Servo Controller
//!
//! 16-channel, 12-bit PWM driver on I2C, used here to position hobby servos.
//!
//! ## Servo mapping
//!
//! A servo angle is mapped linearly onto a pulse length expressed in PWM
//! ticks (1/4096 of the period). At 50 Hz one tick is ~4.9 µs, so the default
//! range of 145..580 ticks spans roughly 0.7 ms to 2.8 ms.
//!
//! ## Pin capability
//!
//! Channels behave as output-only pins: High sets the channel full-on, Low
//! full-off. Reading a pin reports the full-on bit of the channel.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{PinIo, PinMode, PinModes, PinState};
use crate::bus::I2cBus;
use crate::error::{PeriphLinkError, Result};

/// Default I2C address (all address pins low)
pub const PCA9685_ADDRESS: u8 = 0x40;

/// Number of PWM channels
pub const PCA9685_CHANNELS: u8 = 16;

/// Internal oscillator frequency in Hz
const OSCILLATOR_HZ: f64 = 25_000_000.0;

/// PWM resolution (ticks per period)
pub const PWM_RESOLUTION: u16 = 4096;

/// Setting bit 12 of ON or OFF selects full-on / full-off
const FULL: u16 = 0x1000;

const MODE1: u8 = 0x00;
const MODE2: u8 = 0x01;
const LED0_ON_L: u8 = 0x06;
const PRESCALE: u8 = 0xFE;

const MODE1_RESTART: u8 = 0x80;
const MODE1_AI: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;
const MODE1_ALLCALL: u8 = 0x01;
const MODE2_OUTDRV: u8 = 0x04;

/// Oscillator start-up time after leaving sleep
const OSCILLATOR_SETTLE: Duration = Duration::from_millis(5);

/// Linear angle-to-pulse mapping for servos on this controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoRange {
    pub min_angle: u16,
    pub max_angle: u16,
    pub min_pulse: u16,
    pub max_pulse: u16,
}

impl Default for ServoRange {
    fn default() -> Self {
        Self {
            min_angle: 0,
            max_angle: 180,
            min_pulse: 145,
            max_pulse: 580,
        }
    }
}

impl ServoRange {
    /// Pulse length in ticks for `angle`, clamped into the range
    ///
    /// An empty or inverted angle range maps every angle to `min_pulse`.
    #[must_use]
    pub fn pulse_for(&self, angle: u16) -> u16 {
        if self.max_angle <= self.min_angle {
            return self.min_pulse;
        }
        let angle = angle.clamp(self.min_angle, self.max_angle);
        let span = u32::from(self.max_angle - self.min_angle);
        let offset = u32::from(angle - self.min_angle);
        let pulse_span = i64::from(self.max_pulse) - i64::from(self.min_pulse);
        let pulse = i64::from(self.min_pulse) + pulse_span * i64::from(offset) / i64::from(span);
        pulse as u16
    }
}

/// Prescaler value for a PWM frequency, clamped to the legal 3..=255
pub fn prescale_for(frequency_hz: f64) -> u8 {
    let prescale = (OSCILLATOR_HZ / (f64::from(PWM_RESOLUTION) * frequency_hz)).round() - 1.0;
    prescale.clamp(3.0, 255.0) as u8
}

/// PCA9685 driver
pub struct Pca9685 {
    bus: Box<dyn I2cBus>,
    address: u8,
    servo: ServoRange,
    modes: PinModes,
}

impl std::fmt::Debug for Pca9685 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pca9685")
            .field("address", &format_args!("{:#04x}", self.address))
            .field("servo", &self.servo)
            .finish_non_exhaustive()
    }
}

impl Pca9685 {
    pub fn new(bus: Box<dyn I2cBus>, address: u8) -> Self {
        Self {
            bus,
            address,
            servo: ServoRange::default(),
            modes: PinModes::new("PCA9685", PCA9685_CHANNELS),
        }
    }

    /// Wake the chip with totem-pole outputs, register auto-increment and the
    /// given PWM frequency
    ///
    /// # Errors
    ///
    /// Transport errors from the I2C bus.
    pub fn init(&mut self, frequency_hz: f64) -> Result<()> {
        self.write_register(MODE2, MODE2_OUTDRV)?;
        self.write_register(MODE1, MODE1_ALLCALL | MODE1_AI)?;
        thread::sleep(OSCILLATOR_SETTLE);
        self.set_pwm_frequency(frequency_hz)?;
        info!(
            "PCA9685 at {:#04x} initialised ({} Hz)",
            self.address, frequency_hz
        );
        Ok(())
    }

    /// Reprogram the prescaler; the chip must sleep while it changes
    pub fn set_pwm_frequency(&mut self, frequency_hz: f64) -> Result<()> {
        let prescale = prescale_for(frequency_hz);
        let old_mode = self.read_register(MODE1)?;
        self.write_register(MODE1, (old_mode & !MODE1_RESTART) | MODE1_SLEEP)?;
        self.write_register(PRESCALE, prescale)?;
        self.write_register(MODE1, old_mode)?;
        thread::sleep(OSCILLATOR_SETTLE);
        self.write_register(MODE1, old_mode | MODE1_RESTART)?;
        debug!("PCA9685 prescale set to {}", prescale);
        Ok(())
    }

    /// Set the raw ON/OFF tick counts of a channel
    ///
    /// Values of 4096 select the full-on / full-off bit.
    pub fn set_pwm(&mut self, channel: u8, on: u16, off: u16) -> Result<()> {
        self.modes.check(channel)?;
        let on = on.min(FULL);
        let off = off.min(FULL);
        let register = LED0_ON_L + 4 * channel;
        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        self.bus
            .write(self.address, &[register, on_l, on_h, off_l, off_h])?;
        Ok(())
    }

    /// Configure the angle-to-pulse mapping used by [`Pca9685::set_servo_angle`]
    ///
    /// # Errors
    ///
    /// `Calibration` if the angle range is empty or a pulse exceeds 4095 ticks.
    pub fn set_servo_range(&mut self, range: ServoRange) -> Result<()> {
        if range.min_angle >= range.max_angle {
            return Err(PeriphLinkError::Calibration(format!(
                "servo angle range {}..{} is empty",
                range.min_angle, range.max_angle
            )));
        }
        if range.min_pulse >= PWM_RESOLUTION || range.max_pulse >= PWM_RESOLUTION {
            return Err(PeriphLinkError::Calibration(format!(
                "servo pulse range {}..{} exceeds {} ticks",
                range.min_pulse,
                range.max_pulse,
                PWM_RESOLUTION - 1
            )));
        }
        self.servo = range;
        Ok(())
    }

    pub fn servo_range(&self) -> ServoRange {
        self.servo
    }

    /// Move the servo on `channel` to `angle` (clamped into the servo range)
    pub fn set_servo_angle(&mut self, channel: u8, angle: u16) -> Result<()> {
        let pulse = self.servo.pulse_for(angle);
        debug!("Servo {} -> {}° ({} ticks)", channel, angle, pulse);
        self.set_pwm(channel, 0, pulse)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.bus.write(self.address, &[register, value])?;
        Ok(())
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.bus.write_read(self.address, &[register], &mut buf)?;
        Ok(buf[0])
    }
}

impl PinIo for Pca9685 {
    fn pin_count(&self) -> u8 {
        PCA9685_CHANNELS
    }

    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<()> {
        self.modes.check(pin)?;
        if mode != PinMode::Output {
            return Err(PeriphLinkError::UnsupportedPinMode {
                device: "PCA9685",
                pin,
                mode,
            });
        }
        self.modes.set(pin, mode)
    }

    fn write_pin(&mut self, pin: u8, state: PinState) -> Result<()> {
        self.modes.check_output(pin)?;
        match state {
            PinState::High => self.set_pwm(pin, FULL, 0),
            PinState::Low => self.set_pwm(pin, 0, FULL),
        }
    }

    fn read_pin(&mut self, pin: u8) -> Result<PinState> {
        self.modes.check(pin)?;
        let on_h = self.read_register(LED0_ON_L + 4 * pin + 1)?;
        Ok(PinState::from(on_h & 0x10 != 0))
    }
}
