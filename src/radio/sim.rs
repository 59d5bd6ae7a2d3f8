//! # Simulated Air
//!
//! Register-level model of nRF24L01+ chips sharing one in-memory channel.
//!
//! Each [`SimulatedNrf24`] answers SPI frames the way the real chip does
//! (STATUS clocked out first, register file, TX/RX FIFOs) and watches its
//! CE line on a [`SimGpio`]. While a chip is powered up in TX mode with CE
//! high, every queued payload goes on the air: it lands in the RX FIFO of a
//! listening peer whose open pipe matches TX_ADDR, and the sender sees
//! TX_DS. With no taker the sender burns its configured retransmits and
//! raises MAX_RT, exactly as OBSERVE_TX reports on hardware.
//!
//! One lock guards the whole air so two nodes on different threads cannot
//! deadlock delivering to each other.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::trace;

use super::registers::*;
use super::Rf24;
use crate::bus::sim::SimGpio;
use crate::bus::SpiBus;
use crate::device::{GpioDevice, PinState, RadioPins, DEFAULT_GPIO_PIN_COUNT};
use crate::error::Result;

/// Host pin the simulated CE line is wired to
pub const SIM_CE_PIN: u8 = 22;

/// Depth of each hardware FIFO
const FIFO_DEPTH: usize = 3;

/// Single-byte register file size (0x00..=0x1D)
const REGISTER_COUNT: usize = 0x1E;

const ADDRESS_LEN: usize = 5;

struct Chip {
    registers: [u8; REGISTER_COUNT],
    rx_addr_p0: [u8; ADDRESS_LEN],
    rx_addr_p1: [u8; ADDRESS_LEN],
    tx_addr: [u8; ADDRESS_LEN],
    flags: u8,
    tx_fifo: VecDeque<Bytes>,
    rx_fifo: VecDeque<(u8, Bytes)>,
    gpio: SimGpio,
    ce_pin: u8,
    deaf: bool,
}

impl Chip {
    fn new(gpio: SimGpio, ce_pin: u8) -> Self {
        let mut registers = [0u8; REGISTER_COUNT];
        registers[CONFIG as usize] = EN_CRC;
        registers[EN_AA as usize] = 0x3F;
        registers[EN_RXADDR as usize] = 0x03;
        registers[SETUP_AW as usize] = 0x03;
        registers[SETUP_RETR as usize] = 0x03;
        registers[RF_CH as usize] = 0x02;
        registers[RF_SETUP as usize] = 0x0E;
        for (offset, value) in [0xC3u8, 0xC4, 0xC5, 0xC6].into_iter().enumerate() {
            registers[RX_ADDR_P0 as usize + 2 + offset] = value;
        }
        Self {
            registers,
            rx_addr_p0: [0xE7; ADDRESS_LEN],
            rx_addr_p1: [0xC2; ADDRESS_LEN],
            tx_addr: [0xE7; ADDRESS_LEN],
            flags: 0,
            tx_fifo: VecDeque::new(),
            rx_fifo: VecDeque::new(),
            gpio,
            ce_pin,
            deaf: false,
        }
    }

    fn reg(&self, register: u8) -> u8 {
        self.registers[register as usize]
    }

    fn powered(&self) -> bool {
        self.reg(CONFIG) & PWR_UP != 0
    }

    fn primary_rx(&self) -> bool {
        self.reg(CONFIG) & PRIM_RX != 0
    }

    fn ce_high(&self) -> bool {
        self.gpio.level(self.ce_pin) == PinState::High
    }

    fn address_width(&self) -> usize {
        width_for_setup_aw(self.reg(SETUP_AW)).unwrap_or(ADDRESS_LEN)
    }

    fn receiving(&self) -> bool {
        self.powered() && self.primary_rx() && self.ce_high() && !self.deaf
    }

    fn status(&self) -> u8 {
        let pipe = self.rx_fifo.front().map_or(RX_P_NO_EMPTY, |(pipe, _)| *pipe);
        let tx_full = if self.tx_fifo.len() >= FIFO_DEPTH { TX_FULL } else { 0 };
        self.flags | (pipe << RX_P_NO_SHIFT) | tx_full
    }

    fn fifo_status(&self) -> u8 {
        let mut value = 0;
        if self.tx_fifo.len() >= FIFO_DEPTH {
            value |= FIFO_TX_FULL;
        }
        if self.tx_fifo.is_empty() {
            value |= FIFO_TX_EMPTY;
        }
        if self.rx_fifo.len() >= FIFO_DEPTH {
            value |= FIFO_RX_FULL;
        }
        if self.rx_fifo.is_empty() {
            value |= FIFO_RX_EMPTY;
        }
        value
    }

    /// Full address of `pipe`; pipes 2-5 borrow bytes 1.. from pipe 1
    fn pipe_address(&self, pipe: u8) -> Vec<u8> {
        let width = self.address_width();
        match pipe {
            0 => self.rx_addr_p0[..width].to_vec(),
            1 => self.rx_addr_p1[..width].to_vec(),
            _ => {
                let mut address = self.rx_addr_p1[..width].to_vec();
                address[0] = self.reg(RX_ADDR_P0 + pipe);
                address
            }
        }
    }

    /// Open pipe (with a payload width) listening on `address`
    fn matching_pipe(&self, address: &[u8]) -> Option<u8> {
        (0..PIPE_COUNT).find(|&pipe| {
            self.reg(EN_RXADDR) & (1 << pipe) != 0
                && self.reg(RX_PW_P0 + pipe) != 0
                && self.pipe_address(pipe) == address
        })
    }

    fn read_register(&self, register: u8, out: &mut [u8]) {
        let multi = match register {
            RX_ADDR_P0 => Some(&self.rx_addr_p0),
            r if r == RX_ADDR_P0 + 1 => Some(&self.rx_addr_p1),
            TX_ADDR => Some(&self.tx_addr),
            _ => None,
        };
        if let Some(address) = multi {
            for (byte, value) in out.iter_mut().zip(address.iter()) {
                *byte = *value;
            }
            return;
        }

        let value = match register {
            STATUS => self.status(),
            FIFO_STATUS => self.fifo_status(),
            r if (r as usize) < REGISTER_COUNT => self.reg(r),
            _ => 0,
        };
        if let Some(first) = out.first_mut() {
            *first = value;
        }
    }

    fn write_register(&mut self, register: u8, data: &[u8]) {
        let Some(&value) = data.first() else {
            return;
        };
        match register {
            STATUS => self.flags &= !(value & (RX_DR | TX_DS | MAX_RT)),
            OBSERVE_TX | FIFO_STATUS => {}
            RX_ADDR_P0 => copy_address(&mut self.rx_addr_p0, data),
            r if r == RX_ADDR_P0 + 1 => copy_address(&mut self.rx_addr_p1, data),
            TX_ADDR => copy_address(&mut self.tx_addr, data),
            RF_CH => {
                self.registers[RF_CH as usize] = value & 0x7F;
                // PLOS_CNT resets on a channel write
                self.registers[OBSERVE_TX as usize] &= ARC_CNT_MASK;
            }
            r if (r as usize) < REGISTER_COUNT => self.registers[r as usize] = value,
            _ => {}
        }
    }
}

fn copy_address(target: &mut [u8; ADDRESS_LEN], data: &[u8]) {
    for (slot, value) in target.iter_mut().zip(data.iter()) {
        *slot = *value;
    }
}

#[derive(Default)]
struct AirState {
    chips: Vec<Chip>,
}

impl AirState {
    /// Put every queued payload of `sender` on the air
    fn pump(&mut self, sender: usize) {
        loop {
            let chip = &self.chips[sender];
            if !chip.powered()
                || chip.primary_rx()
                || !chip.ce_high()
                || chip.flags & MAX_RT != 0
                || chip.tx_fifo.is_empty()
            {
                return;
            }
            let width = chip.address_width();
            let destination = chip.tx_addr[..width].to_vec();
            let channel = chip.reg(RF_CH);
            let wants_ack = chip.reg(EN_AA) & 1 != 0;
            // The ack comes back to pipe 0, which must carry the same address
            let hears_ack = chip.reg(EN_RXADDR) & 1 != 0 && chip.rx_addr_p0[..width] == destination[..];

            let mut acked = false;
            if let Some(payload) = self.chips[sender].tx_fifo.front().cloned() {
                for (index, peer) in self.chips.iter_mut().enumerate() {
                    if index == sender || !peer.receiving() || peer.reg(RF_CH) != channel {
                        continue;
                    }
                    let Some(pipe) = peer.matching_pipe(&destination) else {
                        continue;
                    };
                    if peer.rx_fifo.len() >= FIFO_DEPTH {
                        // Dropped without an ack
                        break;
                    }
                    let width = usize::from(peer.reg(RX_PW_P0 + pipe));
                    let mut stored = payload.to_vec();
                    stored.resize(width, 0);
                    peer.rx_fifo.push_back((pipe, Bytes::from(stored)));
                    peer.flags |= RX_DR;
                    acked = peer.reg(EN_AA) & (1 << pipe) != 0;
                    trace!("Sim: chip {} -> chip {} pipe {}", sender, index, pipe);
                    break;
                }
            }

            let chip = &mut self.chips[sender];
            if !wants_ack || (acked && hears_ack) {
                chip.tx_fifo.pop_front();
                chip.flags |= TX_DS;
                chip.registers[OBSERVE_TX as usize] &= !ARC_CNT_MASK;
            } else {
                let retries = chip.reg(SETUP_RETR) & ARC_CNT_MASK;
                let lost = (chip.reg(OBSERVE_TX) >> PLOS_CNT_SHIFT).saturating_add(1).min(15);
                chip.registers[OBSERVE_TX as usize] = (lost << PLOS_CNT_SHIFT) | retries;
                chip.flags |= MAX_RT;
                trace!("Sim: chip {} gave up after {} retries", sender, retries);
            }
        }
    }

    fn transfer(&mut self, index: usize, buf: &mut [u8]) {
        self.pump(index);
        let chip = &mut self.chips[index];
        let Some((&mut command, data)) = buf.split_first_mut() else {
            return;
        };
        let status = chip.status();

        match command {
            c if c & 0xE0 == R_REGISTER => chip.read_register(c & REGISTER_MASK, data),
            c if c & 0xE0 == W_REGISTER => chip.write_register(c & REGISTER_MASK, data),
            R_RX_PAYLOAD => {
                data.iter_mut().for_each(|b| *b = 0);
                if let Some((_, payload)) = chip.rx_fifo.pop_front() {
                    for (byte, value) in data.iter_mut().zip(payload.iter()) {
                        *byte = *value;
                    }
                }
            }
            W_TX_PAYLOAD => {
                if chip.tx_fifo.len() < FIFO_DEPTH {
                    chip.tx_fifo.push_back(Bytes::copy_from_slice(data));
                }
            }
            FLUSH_TX => chip.tx_fifo.clear(),
            FLUSH_RX => chip.rx_fifo.clear(),
            _ => {}
        }
        buf[0] = status;

        // Writes to CONFIG or the FIFO may start a transmission right away
        self.pump(index);
    }
}

/// Shared channel the simulated chips transmit on
#[derive(Clone, Default)]
pub struct Air {
    state: Arc<Mutex<AirState>>,
}

impl std::fmt::Debug for Air {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chips = self.lock().map(|state| state.chips.len()).unwrap_or(0);
        f.debug_struct("Air").field("chips", &chips).finish()
    }
}

impl Air {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chip whose CE line is `ce_pin` on `gpio`
    pub fn attach(&self, gpio: SimGpio, ce_pin: u8) -> io::Result<SimulatedNrf24> {
        let mut state = self.lock()?;
        state.chips.push(Chip::new(gpio, ce_pin));
        Ok(SimulatedNrf24 {
            air: self.clone(),
            index: state.chips.len() - 1,
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, AirState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("simulated air poisoned"))
    }
}

/// SPI side of one simulated nRF24L01+
///
/// Clones address the same chip, so a test can keep one to disturb the
/// link while the driver owns another.
#[derive(Debug, Clone)]
pub struct SimulatedNrf24 {
    air: Air,
    index: usize,
}

impl SimulatedNrf24 {
    /// Drop everything sent to this chip, as if out of range
    pub fn set_deaf(&self, deaf: bool) {
        if let Ok(mut state) = self.air.lock() {
            state.chips[self.index].deaf = deaf;
        }
    }

    /// Payloads waiting in the RX FIFO
    pub fn pending_rx(&self) -> usize {
        self.air
            .lock()
            .map(|state| state.chips[self.index].rx_fifo.len())
            .unwrap_or(0)
    }
}

impl SpiBus for SimulatedNrf24 {
    fn transfer(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.air.lock()?.transfer(self.index, buf);
        Ok(())
    }
}

/// Build a driver for a fresh chip on `air`, with its own simulated GPIO
///
/// Returns the driver and a handle to the chip for disturbing the link.
pub fn simulated_radio(air: &Air) -> Result<(Rf24<SimulatedNrf24>, SimulatedNrf24)> {
    let gpio = SimGpio::new();
    let chip = air.attach(gpio.clone(), SIM_CE_PIN)?;
    let device = GpioDevice::new(Box::new(gpio), DEFAULT_GPIO_PIN_COUNT);
    let pins = RadioPins::new(device.line(SIM_CE_PIN)?, None)?;
    Ok((Rf24::new(chip.clone(), pins), chip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::RadioMode;

    fn read(chip: &mut SimulatedNrf24, register: u8) -> u8 {
        let mut buf = [R_REGISTER | register, NOP];
        chip.transfer(&mut buf).unwrap();
        buf[1]
    }

    fn write(chip: &mut SimulatedNrf24, register: u8, value: u8) {
        chip.transfer(&mut [W_REGISTER | register, value]).unwrap();
    }

    #[test]
    fn test_reset_values() {
        let air = Air::new();
        let mut chip = air.attach(SimGpio::new(), SIM_CE_PIN).unwrap();

        assert_eq!(read(&mut chip, CONFIG), 0x08);
        assert_eq!(read(&mut chip, EN_RXADDR), 0x03);
        assert_eq!(read(&mut chip, FIFO_STATUS), FIFO_TX_EMPTY | FIFO_RX_EMPTY);

        let mut status = [NOP];
        chip.transfer(&mut status).unwrap();
        assert_eq!(status[0], RX_P_NO_EMPTY << RX_P_NO_SHIFT);
    }

    #[test]
    fn test_status_bits_clear_on_write_one() {
        let air = Air::new();
        let mut chip = air.attach(SimGpio::new(), SIM_CE_PIN).unwrap();
        air.lock().unwrap().chips[0].flags = RX_DR | MAX_RT;

        write(&mut chip, STATUS, MAX_RT);
        assert_eq!(read(&mut chip, STATUS) & (RX_DR | MAX_RT), RX_DR);
    }

    #[test]
    fn test_address_registers_hold_five_bytes() {
        let air = Air::new();
        let mut chip = air.attach(SimGpio::new(), SIM_CE_PIN).unwrap();
        chip.transfer(&mut [W_REGISTER | TX_ADDR, b'1', b'N', b'o', b'd', b'e'])
            .unwrap();

        let mut buf = [R_REGISTER | TX_ADDR, NOP, NOP, NOP, NOP, NOP];
        chip.transfer(&mut buf).unwrap();
        assert_eq!(&buf[1..], b"1Node");
    }

    #[test]
    fn test_tx_waits_for_ce() {
        let air = Air::new();
        let gpio = SimGpio::new();
        let mut chip = air.attach(gpio.clone(), SIM_CE_PIN).unwrap();
        write(&mut chip, CONFIG, EN_CRC | PWR_UP);
        write(&mut chip, EN_AA, 0);
        chip.transfer(&mut [W_TX_PAYLOAD, 1, 2, 3, 4]).unwrap();

        assert_eq!(read(&mut chip, FIFO_STATUS) & FIFO_TX_EMPTY, 0);
        gpio.drive(SIM_CE_PIN, PinState::High);
        // No auto-ack: sent as soon as CE rises
        assert_ne!(read(&mut chip, STATUS) & TX_DS, 0);
        assert_ne!(read(&mut chip, FIFO_STATUS) & FIFO_TX_EMPTY, 0);
    }

    #[test]
    fn test_deaf_chip_misses_packets() {
        let air = Air::new();
        let (mut a, _) = simulated_radio(&air).unwrap();
        let (mut b, b_chip) = simulated_radio(&air).unwrap();
        for radio in [&mut a, &mut b] {
            radio.begin().unwrap();
            radio.set_payload_size(4).unwrap();
        }
        a.open_writing_pipe(b"1Node").unwrap();
        b.open_reading_pipe(1, b"1Node").unwrap();
        b.start_listening().unwrap();
        assert_eq!(b.mode(), RadioMode::Listening);

        b_chip.set_deaf(true);
        assert!(!a.write(&[1, 2, 3, 4]).unwrap());
        assert_eq!(b_chip.pending_rx(), 0);

        b_chip.set_deaf(false);
        assert!(a.write(&[1, 2, 3, 4]).unwrap());
        assert_eq!(b_chip.pending_rx(), 1);
    }

    #[test]
    fn test_full_rx_fifo_drops_without_ack() {
        let air = Air::new();
        let (mut a, _) = simulated_radio(&air).unwrap();
        let (mut b, b_chip) = simulated_radio(&air).unwrap();
        for radio in [&mut a, &mut b] {
            radio.begin().unwrap();
            radio.set_payload_size(4).unwrap();
        }
        a.open_writing_pipe(b"1Node").unwrap();
        b.open_reading_pipe(1, b"1Node").unwrap();
        b.start_listening().unwrap();

        for n in 0..3u8 {
            assert!(a.write(&[n; 4]).unwrap());
        }
        assert!(!a.write(&[9; 4]).unwrap());
        assert_eq!(b_chip.pending_rx(), 3);
        assert_eq!(b.read(4).unwrap(), vec![0; 4]);
    }
}
