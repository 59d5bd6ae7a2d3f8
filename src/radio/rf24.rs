//! # nRF24L01+ Driver
//!
//! Blocking driver for the nRF24L01+ over SPI, with the chip-enable line
//! borrowed from the host GPIO through [`RadioPins`].
//!
//! ## Modes
//!
//! The driver tracks [`RadioMode`] explicitly. `write` is only legal while
//! Transmitting; `available` and `read` only while Listening. Calling them in
//! the wrong mode fails with `WrongRadioMode` instead of silently returning
//! stale data.
//!
//! ## Acknowledgement
//!
//! Auto-ack is enabled on every pipe. The transmitter listens for the ack on
//! pipe 0, so [`Rf24::open_writing_pipe`] also programs RX_ADDR_P0 with the
//! destination address; [`Rf24::start_listening`] restores any reading
//! address the application gave pipe 0.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::registers::*;
use super::{RadioLink, RadioMode};
use crate::bus::SpiBus;
use crate::device::{PinState, RadioPins};
use crate::error::{PeriphLinkError, Result};

/// Power-on reset settle time before the first SPI access
const POWER_ON_SETTLE: Duration = Duration::from_millis(5);

/// Standby-I to Standby-II / Power Down to Standby time
const POWER_UP_SETTLE: Duration = Duration::from_millis(5);

/// RX to TX turnaround after dropping CE
const RX_TO_TX_SETTLE: Duration = Duration::from_micros(130);

/// Upper bound on a single send, well beyond 15 retransmits at 4 ms each
const WRITE_DEADLINE: Duration = Duration::from_millis(95);

/// Default RF channel (2476 MHz)
pub const DEFAULT_CHANNEL: u8 = 76;

/// Default address width in bytes
pub const DEFAULT_ADDRESS_WIDTH: usize = 5;

/// Automatic retransmit policy (SETUP_RETR)
///
/// `delay` selects ARD = 250 µs × (delay + 1); `count` is the number of
/// retransmissions (ARC) the hardware attempts before raising MAX_RT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: u8,
    count: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { delay: 5, count: 15 }
    }
}

impl RetryPolicy {
    /// # Errors
    ///
    /// `InvalidRetryPolicy` if either field exceeds 15.
    pub fn new(delay: u8, count: u8) -> Result<Self> {
        if delay > MAX_RETRY_FIELD || count > MAX_RETRY_FIELD {
            return Err(PeriphLinkError::InvalidRetryPolicy { delay, count });
        }
        Ok(Self { delay, count })
    }

    pub fn delay(&self) -> u8 {
        self.delay
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    /// Wait between retransmissions
    pub fn retransmit_delay(&self) -> Duration {
        Duration::from_micros(250 * (u64::from(self.delay) + 1))
    }

    fn register_value(&self) -> u8 {
        (self.delay << ARD_SHIFT) | self.count
    }
}

/// Transmit counters from OBSERVE_TX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxObservation {
    /// Packets lost since the last channel change (saturates at 15)
    pub lost_packets: u8,
    /// Retransmissions of the last packet
    pub retransmits: u8,
}

/// nRF24L01+ driver
pub struct Rf24<S: SpiBus> {
    spi: S,
    pins: RadioPins,
    mode: RadioMode,
    channel: u8,
    payload_size: usize,
    address_width: usize,
    retry: RetryPolicy,
    pipe0_reading_address: Option<Vec<u8>>,
}

impl<S: SpiBus> std::fmt::Debug for Rf24<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rf24")
            .field("mode", &self.mode)
            .field("channel", &self.channel)
            .field("payload_size", &self.payload_size)
            .field("address_width", &self.address_width)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<S: SpiBus> Rf24<S> {
    pub fn new(spi: S, pins: RadioPins) -> Self {
        Self {
            spi,
            pins,
            mode: RadioMode::Transmitting,
            channel: DEFAULT_CHANNEL,
            payload_size: MAX_PAYLOAD_SIZE,
            address_width: DEFAULT_ADDRESS_WIDTH,
            retry: RetryPolicy::default(),
            pipe0_reading_address: None,
        }
    }

    /// Bring the transceiver into a known state: powered up in TX mode,
    /// 1 Mbps, 0 dBm, 16-bit CRC, static payloads, both FIFOs empty
    ///
    /// # Errors
    ///
    /// `RadioNotResponding` if configuration registers do not read back,
    /// otherwise transport errors.
    pub fn begin(&mut self) -> Result<()> {
        self.pins.set_ce(PinState::Low)?;
        thread::sleep(POWER_ON_SETTLE);

        self.write_register(SETUP_RETR, self.retry.register_value())?;
        self.write_and_verify(RF_SETUP, RF_PWR_MAX)?;
        let aw = setup_aw_for(self.address_width).ok_or(PeriphLinkError::InvalidAddress {
            len: self.address_width,
            expected: DEFAULT_ADDRESS_WIDTH,
        })?;
        self.write_and_verify(SETUP_AW, aw)?;

        self.write_register(FEATURE, 0)?;
        self.write_register(DYNPD, 0)?;
        self.write_register(EN_AA, 0x3F)?;
        self.write_register(STATUS, RX_DR | TX_DS | MAX_RT)?;
        self.write_register(RF_CH, self.channel)?;
        for pipe in 0..PIPE_COUNT {
            self.write_register(RX_PW_P0 + pipe, self.payload_size as u8)?;
        }
        self.command(FLUSH_RX)?;
        self.command(FLUSH_TX)?;

        self.write_and_verify(CONFIG, EN_CRC | CRCO | PWR_UP)?;
        thread::sleep(POWER_UP_SETTLE);
        self.mode = RadioMode::Transmitting;

        info!(
            "nRF24L01+ ready on channel {} ({} byte payloads)",
            self.channel, self.payload_size
        );
        Ok(())
    }

    /// Program the automatic retransmit policy for subsequent sends
    ///
    /// # Errors
    ///
    /// `InvalidRetryPolicy` if `delay` or `count` exceeds 15.
    pub fn set_retries(&mut self, delay: u8, count: u8) -> Result<()> {
        let policy = RetryPolicy::new(delay, count)?;
        self.write_register(SETUP_RETR, policy.register_value())?;
        self.retry = policy;
        debug!(
            "Retries set to {} x {:?}",
            policy.count(),
            policy.retransmit_delay()
        );
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Select RF channel 0-125 (2400 + n MHz)
    pub fn set_channel(&mut self, channel: u8) -> Result<()> {
        if channel > MAX_CHANNEL {
            return Err(PeriphLinkError::InvalidChannel(channel));
        }
        self.write_register(RF_CH, channel)?;
        self.channel = channel;
        Ok(())
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Static payload size for every pipe, clamped to 1..=32
    pub fn set_payload_size(&mut self, size: usize) -> Result<()> {
        let size = size.clamp(1, MAX_PAYLOAD_SIZE);
        for pipe in 0..PIPE_COUNT {
            self.write_register(RX_PW_P0 + pipe, size as u8)?;
        }
        self.payload_size = size;
        Ok(())
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Address width in bytes (3..=5) used by every pipe
    pub fn set_address_width(&mut self, width: usize) -> Result<()> {
        let aw = setup_aw_for(width).ok_or(PeriphLinkError::InvalidAddress {
            len: width,
            expected: DEFAULT_ADDRESS_WIDTH,
        })?;
        self.write_register(SETUP_AW, aw)?;
        self.address_width = width;
        Ok(())
    }

    pub fn address_width(&self) -> usize {
        self.address_width
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    /// Address every following `write` goes to
    ///
    /// # Errors
    ///
    /// `InvalidAddress` unless `address` is exactly the configured width.
    pub fn open_writing_pipe(&mut self, address: &[u8]) -> Result<()> {
        self.check_address(address)?;
        self.write_register_bytes(RX_ADDR_P0, address)?;
        self.write_register_bytes(TX_ADDR, address)?;
        self.write_register(RX_PW_P0, self.payload_size as u8)?;
        debug!("Writing pipe opened: {}", format_address(address));
        Ok(())
    }

    /// Enable reception on `pipe` (0-5) at `address`
    ///
    /// Pipes 2-5 share bytes 1.. of pipe 1's address; only their first byte
    /// is written.
    pub fn open_reading_pipe(&mut self, pipe: u8, address: &[u8]) -> Result<()> {
        if pipe >= PIPE_COUNT {
            return Err(PeriphLinkError::InvalidPipe(pipe));
        }
        self.check_address(address)?;

        if pipe == 0 {
            self.pipe0_reading_address = Some(address.to_vec());
        }
        if pipe < 2 {
            self.write_register_bytes(RX_ADDR_P0 + pipe, address)?;
        } else {
            self.write_register(RX_ADDR_P0 + pipe, address[0])?;
        }
        self.write_register(RX_PW_P0 + pipe, self.payload_size as u8)?;
        let enabled = self.read_register(EN_RXADDR)?;
        self.write_register(EN_RXADDR, enabled | (1 << pipe))?;
        debug!("Reading pipe {} opened: {}", pipe, format_address(address));
        Ok(())
    }

    /// Stop receiving on `pipe`
    pub fn close_reading_pipe(&mut self, pipe: u8) -> Result<()> {
        if pipe >= PIPE_COUNT {
            return Err(PeriphLinkError::InvalidPipe(pipe));
        }
        let enabled = self.read_register(EN_RXADDR)?;
        self.write_register(EN_RXADDR, enabled & !(1 << pipe))?;
        if pipe == 0 {
            self.pipe0_reading_address = None;
        }
        Ok(())
    }

    /// Enter Listening: PRIM_RX set, interrupts cleared, CE high
    pub fn start_listening(&mut self) -> Result<()> {
        let config = self.read_register(CONFIG)?;
        self.write_register(CONFIG, config | PRIM_RX)?;
        self.write_register(STATUS, RX_DR | TX_DS | MAX_RT)?;
        self.pins.set_ce(PinState::High)?;

        // Pipe 0 carried the ack address while transmitting
        match self.pipe0_reading_address.clone() {
            Some(address) => self.write_register_bytes(RX_ADDR_P0, &address)?,
            None => {
                let enabled = self.read_register(EN_RXADDR)?;
                self.write_register(EN_RXADDR, enabled & !1)?;
            }
        }
        self.mode = RadioMode::Listening;
        Ok(())
    }

    /// Enter Transmitting: CE low, PRIM_RX clear, pipe 0 enabled for acks
    pub fn stop_listening(&mut self) -> Result<()> {
        self.pins.set_ce(PinState::Low)?;
        thread::sleep(RX_TO_TX_SETTLE);
        let config = self.read_register(CONFIG)?;
        self.write_register(CONFIG, config & !PRIM_RX)?;
        let enabled = self.read_register(EN_RXADDR)?;
        self.write_register(EN_RXADDR, enabled | 1)?;
        self.mode = RadioMode::Transmitting;
        Ok(())
    }

    /// Send one payload and wait for the ack
    ///
    /// Returns `Ok(false)` when the hardware gave up after the configured
    /// retransmits (MAX_RT) or the send did not finish in time. Neither is
    /// an error: the channel is lossy.
    ///
    /// # Errors
    ///
    /// `WrongRadioMode` while Listening, `PayloadTooLarge` for payloads
    /// longer than the static payload size, or transport errors.
    pub fn write(&mut self, payload: &[u8]) -> Result<bool> {
        self.require_mode(RadioMode::Transmitting, "write")?;
        if payload.len() > self.payload_size {
            return Err(PeriphLinkError::PayloadTooLarge {
                len: payload.len(),
                max: self.payload_size,
            });
        }

        let mut frame = vec![0u8; 1 + self.payload_size];
        frame[0] = W_TX_PAYLOAD;
        frame[1..=payload.len()].copy_from_slice(payload);
        self.spi.transfer(&mut frame)?;

        self.pins.set_ce(PinState::High)?;
        let deadline = Instant::now() + WRITE_DEADLINE;
        let status = loop {
            let status = self.command(NOP)?;
            if status & (TX_DS | MAX_RT) != 0 {
                break Some(status);
            }
            if Instant::now() >= deadline {
                break None;
            }
            thread::yield_now();
        };
        self.pins.set_ce(PinState::Low)?;
        self.write_register(STATUS, RX_DR | TX_DS | MAX_RT)?;

        match status {
            Some(status) if status & MAX_RT != 0 => {
                self.command(FLUSH_TX)?;
                debug!("Send not acknowledged after {} retries", self.retry.count());
                Ok(false)
            }
            Some(_) => Ok(true),
            None => {
                self.command(FLUSH_TX)?;
                warn!("Send did not complete within {:?}", WRITE_DEADLINE);
                Ok(false)
            }
        }
    }

    /// Whether the RX FIFO holds an unread payload
    pub fn available(&mut self) -> Result<bool> {
        Ok(self.available_pipe()?.is_some())
    }

    /// Pipe number of the oldest unread payload, if any
    pub fn available_pipe(&mut self) -> Result<Option<u8>> {
        self.require_mode(RadioMode::Listening, "available")?;
        if self.read_register(FIFO_STATUS)? & FIFO_RX_EMPTY != 0 {
            return Ok(None);
        }
        let status = self.command(NOP)?;
        let pipe = (status & RX_P_NO_MASK) >> RX_P_NO_SHIFT;
        Ok(if pipe == RX_P_NO_EMPTY { None } else { Some(pipe) })
    }

    /// Pop the oldest payload and return its first `len` bytes
    ///
    /// # Errors
    ///
    /// `NoPayload` when the RX FIFO is empty, `WrongRadioMode` while
    /// Transmitting, or transport errors.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        self.require_mode(RadioMode::Listening, "read")?;
        if self.read_register(FIFO_STATUS)? & FIFO_RX_EMPTY != 0 {
            return Err(PeriphLinkError::NoPayload);
        }

        let mut frame = vec![NOP; 1 + self.payload_size];
        frame[0] = R_RX_PAYLOAD;
        self.spi.transfer(&mut frame)?;
        self.write_register(STATUS, RX_DR)?;

        let len = len.min(self.payload_size);
        Ok(frame[1..=len].to_vec())
    }

    /// Lost-packet and retransmit counters
    pub fn observe_tx(&mut self) -> Result<TxObservation> {
        let observe = self.read_register(OBSERVE_TX)?;
        Ok(TxObservation {
            lost_packets: observe >> PLOS_CNT_SHIFT,
            retransmits: observe & ARC_CNT_MASK,
        })
    }

    /// Power the transceiver down (CE low, PWR_UP clear)
    pub fn power_down(&mut self) -> Result<()> {
        self.pins.set_ce(PinState::Low)?;
        let config = self.read_register(CONFIG)?;
        self.write_register(CONFIG, config & !PWR_UP)?;
        self.mode = RadioMode::Transmitting;
        Ok(())
    }

    /// Register dump for the startup log
    pub fn details(&mut self) -> Result<String> {
        let status = self.command(NOP)?;
        let mut p0 = vec![0u8; self.address_width];
        let mut p1 = vec![0u8; self.address_width];
        let mut tx = vec![0u8; self.address_width];
        self.read_register_bytes(RX_ADDR_P0, &mut p0)?;
        self.read_register_bytes(RX_ADDR_P0 + 1, &mut p1)?;
        self.read_register_bytes(TX_ADDR, &mut tx)?;

        let mut rx_pw = Vec::with_capacity(usize::from(PIPE_COUNT));
        for pipe in 0..PIPE_COUNT {
            rx_pw.push(format!("{:#04x}", self.read_register(RX_PW_P0 + pipe)?));
        }

        Ok(format!(
            "STATUS={:#04x} RX_DR={} TX_DS={} MAX_RT={} RX_P_NO={} TX_FULL={}\n\
             RX_ADDR_P0-1={} {}\n\
             TX_ADDR={}\n\
             RX_PW_P0-5={}\n\
             EN_AA={:#04x} EN_RXADDR={:#04x} RF_CH={:#04x} RF_SETUP={:#04x} CONFIG={:#04x} SETUP_RETR={:#04x}",
            status,
            u8::from(status & RX_DR != 0),
            u8::from(status & TX_DS != 0),
            u8::from(status & MAX_RT != 0),
            (status & RX_P_NO_MASK) >> RX_P_NO_SHIFT,
            u8::from(status & TX_FULL != 0),
            format_address(&p0),
            format_address(&p1),
            format_address(&tx),
            rx_pw.join(" "),
            self.read_register(EN_AA)?,
            self.read_register(EN_RXADDR)?,
            self.read_register(RF_CH)?,
            self.read_register(RF_SETUP)?,
            self.read_register(CONFIG)?,
            self.read_register(SETUP_RETR)?,
        ))
    }

    fn require_mode(&self, expected: RadioMode, operation: &'static str) -> Result<()> {
        if self.mode != expected {
            return Err(PeriphLinkError::WrongRadioMode {
                expected,
                operation,
            });
        }
        Ok(())
    }

    fn check_address(&self, address: &[u8]) -> Result<()> {
        if address.len() != self.address_width {
            return Err(PeriphLinkError::InvalidAddress {
                len: address.len(),
                expected: self.address_width,
            });
        }
        Ok(())
    }

    /// Single-byte command; returns STATUS
    fn command(&mut self, command: u8) -> Result<u8> {
        let mut buf = [command];
        self.spi.transfer(&mut buf)?;
        Ok(buf[0])
    }

    fn read_register(&mut self, register: u8) -> Result<u8> {
        let mut buf = [R_REGISTER | (register & REGISTER_MASK), NOP];
        self.spi.transfer(&mut buf)?;
        Ok(buf[1])
    }

    fn read_register_bytes(&mut self, register: u8, out: &mut [u8]) -> Result<()> {
        let mut buf = vec![NOP; 1 + out.len()];
        buf[0] = R_REGISTER | (register & REGISTER_MASK);
        self.spi.transfer(&mut buf)?;
        out.copy_from_slice(&buf[1..]);
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<u8> {
        let mut buf = [W_REGISTER | (register & REGISTER_MASK), value];
        self.spi.transfer(&mut buf)?;
        Ok(buf[0])
    }

    fn write_register_bytes(&mut self, register: u8, values: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(1 + values.len());
        buf.push(W_REGISTER | (register & REGISTER_MASK));
        buf.extend_from_slice(values);
        self.spi.transfer(&mut buf)?;
        Ok(())
    }

    fn write_and_verify(&mut self, register: u8, value: u8) -> Result<()> {
        self.write_register(register, value)?;
        let read = self.read_register(register)?;
        if read != value {
            return Err(PeriphLinkError::RadioNotResponding {
                register,
                read,
                expected: value,
            });
        }
        Ok(())
    }
}

impl<S: SpiBus> RadioLink for Rf24<S> {
    fn start_listening(&mut self) -> Result<()> {
        Rf24::start_listening(self)
    }

    fn stop_listening(&mut self) -> Result<()> {
        Rf24::stop_listening(self)
    }

    fn available(&mut self) -> Result<bool> {
        Rf24::available(self)
    }

    fn write(&mut self, payload: &[u8]) -> Result<bool> {
        Rf24::write(self, payload)
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        Rf24::read(self, len)
    }
}

/// Printable form of a pipe address: ASCII when it is, hex otherwise
pub fn format_address(address: &[u8]) -> String {
    if !address.is_empty() && address.iter().all(|b| b.is_ascii_graphic()) {
        format!("\"{}\"", String::from_utf8_lossy(address))
    } else {
        address
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockSpiBus;
    use crate::radio::codec::{decode_payload, encode_timestamp};
    use crate::radio::sim::{simulated_radio, Air};

    fn node_pair() -> (
        Rf24<crate::radio::sim::SimulatedNrf24>,
        Rf24<crate::radio::sim::SimulatedNrf24>,
        Air,
    ) {
        let air = Air::new();
        let (mut a, _) = simulated_radio(&air).unwrap();
        let (mut b, _) = simulated_radio(&air).unwrap();
        for radio in [&mut a, &mut b] {
            radio.begin().unwrap();
            radio.set_payload_size(4).unwrap();
            radio.set_retries(15, 15).unwrap();
        }
        a.open_writing_pipe(b"1Node").unwrap();
        a.open_reading_pipe(1, b"2Node").unwrap();
        b.open_writing_pipe(b"2Node").unwrap();
        b.open_reading_pipe(1, b"1Node").unwrap();
        (a, b, air)
    }

    #[test]
    fn test_retry_policy_bounds() {
        assert!(RetryPolicy::new(15, 15).is_ok());
        assert!(matches!(
            RetryPolicy::new(16, 3),
            Err(PeriphLinkError::InvalidRetryPolicy { delay: 16, count: 3 })
        ));
        assert!(RetryPolicy::new(0, 16).is_err());

        let policy = RetryPolicy::new(15, 15).unwrap();
        assert_eq!(policy.retransmit_delay(), Duration::from_micros(4000));
        assert_eq!(policy.register_value(), 0xFF);
        assert_eq!(RetryPolicy::new(5, 15).unwrap().register_value(), 0x5F);
    }

    #[test]
    fn test_begin_fails_without_chip() {
        let mut spi = MockSpiBus::new();
        // An absent chip clocks back all zeros
        spi.expect_transfer().returning(|buf| {
            buf.iter_mut().for_each(|b| *b = 0);
            Ok(())
        });
        let air_gpio = crate::bus::sim::SimGpio::new();
        let gpio = crate::device::GpioDevice::new(Box::new(air_gpio), 28);
        let pins = RadioPins::new(gpio.line(22).unwrap(), None).unwrap();
        let mut radio = Rf24::new(spi, pins);

        let err = radio.begin().unwrap_err();
        assert!(matches!(
            err,
            PeriphLinkError::RadioNotResponding { register: RF_SETUP, read: 0, .. }
        ));
    }

    #[test]
    fn test_begin_configures_chip() {
        let air = Air::new();
        let (mut radio, _) = simulated_radio(&air).unwrap();
        radio.begin().unwrap();

        assert_eq!(radio.mode(), RadioMode::Transmitting);
        let details = radio.details().unwrap();
        assert!(details.contains("RF_CH=0x4c"));
        assert!(details.contains("CONFIG=0x0e"));
    }

    #[test]
    fn test_set_retries_writes_register() {
        let air = Air::new();
        let (mut radio, _) = simulated_radio(&air).unwrap();
        radio.begin().unwrap();
        radio.set_retries(15, 15).unwrap();

        assert!(radio.details().unwrap().contains("SETUP_RETR=0xff"));
        assert!(radio.set_retries(3, 20).is_err());
        assert_eq!(radio.retry_policy(), RetryPolicy::new(15, 15).unwrap());
    }

    #[test]
    fn test_pipe_validation() {
        let air = Air::new();
        let (mut radio, _) = simulated_radio(&air).unwrap();
        radio.begin().unwrap();

        assert!(matches!(
            radio.open_reading_pipe(6, b"1Node"),
            Err(PeriphLinkError::InvalidPipe(6))
        ));
        assert!(matches!(
            radio.open_writing_pipe(b"Node"),
            Err(PeriphLinkError::InvalidAddress { len: 4, expected: 5 })
        ));
        assert!(radio.set_channel(126).is_err());
        assert!(radio.set_address_width(6).is_err());
        assert!(radio.open_reading_pipe(5, b"3Node").is_ok());
    }

    #[test]
    fn test_mode_is_enforced() {
        let (mut a, _, _) = node_pair();

        assert!(matches!(
            a.read(4),
            Err(PeriphLinkError::WrongRadioMode {
                expected: RadioMode::Listening,
                ..
            })
        ));
        a.start_listening().unwrap();
        assert!(matches!(
            a.write(&[1, 2, 3, 4]),
            Err(PeriphLinkError::WrongRadioMode {
                expected: RadioMode::Transmitting,
                ..
            })
        ));
        assert!(matches!(a.read(4), Err(PeriphLinkError::NoPayload)));
    }

    #[test]
    fn test_payload_too_large() {
        let (mut a, _, _) = node_pair();
        assert!(matches!(
            a.write(&[0u8; 5]),
            Err(PeriphLinkError::PayloadTooLarge { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_write_delivers_to_listening_peer() {
        let (mut a, mut b, _) = node_pair();
        b.start_listening().unwrap();

        assert!(a.write(&encode_timestamp(1000)).unwrap());
        assert_eq!(a.observe_tx().unwrap().retransmits, 0);

        assert_eq!(b.available_pipe().unwrap(), Some(1));
        let payload = b.read(4).unwrap();
        assert_eq!(decode_payload(&payload).unwrap(), 1000);
        assert!(!b.available().unwrap());
    }

    #[test]
    fn test_echo_round_trip() {
        let (mut a, mut b, _) = node_pair();
        b.start_listening().unwrap();

        assert!(a.write(&encode_timestamp(1000)).unwrap());
        a.start_listening().unwrap();

        let got = decode_payload(&b.read(4).unwrap()).unwrap();
        b.stop_listening().unwrap();
        assert!(b.write(&encode_timestamp(got)).unwrap());

        assert!(a.available().unwrap());
        assert_eq!(decode_payload(&a.read(4).unwrap()).unwrap(), 1000);
    }

    #[test]
    fn test_unacknowledged_write_is_bounded_by_retry_count() {
        let (mut a, _b, _) = node_pair();
        // Peer never started listening

        assert!(!a.write(&encode_timestamp(7)).unwrap());
        let observed = a.observe_tx().unwrap();
        assert_eq!(observed.retransmits, 15);
        assert!(observed.retransmits <= a.retry_policy().count());
        assert_eq!(observed.lost_packets, 1);

        a.set_retries(4, 3).unwrap();
        assert!(!a.write(&encode_timestamp(8)).unwrap());
        assert_eq!(a.observe_tx().unwrap().retransmits, 3);
    }

    #[test]
    fn test_node_does_not_hear_own_address() {
        let air = Air::new();
        let (mut a, _) = simulated_radio(&air).unwrap();
        let (mut b, _) = simulated_radio(&air).unwrap();
        for radio in [&mut a, &mut b] {
            radio.begin().unwrap();
            radio.set_payload_size(4).unwrap();
        }
        a.open_writing_pipe(b"1Node").unwrap();
        b.open_writing_pipe(b"2Node").unwrap();
        b.open_reading_pipe(1, b"3Node").unwrap();
        b.start_listening().unwrap();

        assert!(!a.write(&[1, 2, 3, 4]).unwrap());
        assert!(!b.available().unwrap());
    }

    #[test]
    fn test_short_read_truncates() {
        let (mut a, mut b, _) = node_pair();
        b.start_listening().unwrap();
        a.write(&[9, 8, 7, 6]).unwrap();

        assert_eq!(b.read(2).unwrap(), vec![9, 8]);
    }

    #[test]
    fn test_format_address() {
        assert_eq!(format_address(b"1Node"), "\"1Node\"");
        assert_eq!(format_address(&[0xE7, 0xE7, 0x01]), "E7E701");
    }
}
