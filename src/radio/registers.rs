//! # nRF24L01+ Register Map
//!
//! SPI command set, register addresses and bit fields of the transceiver.

/// Read register: `R_REGISTER | reg`
pub const R_REGISTER: u8 = 0x00;
/// Write register: `W_REGISTER | reg`
pub const W_REGISTER: u8 = 0x20;
/// Register address bits of the two commands above
pub const REGISTER_MASK: u8 = 0x1F;
/// Pop one payload from the RX FIFO
pub const R_RX_PAYLOAD: u8 = 0x61;
/// Push one payload into the TX FIFO
pub const W_TX_PAYLOAD: u8 = 0xA0;
pub const FLUSH_TX: u8 = 0xE1;
pub const FLUSH_RX: u8 = 0xE2;
/// No operation; clocks out STATUS
pub const NOP: u8 = 0xFF;

pub const CONFIG: u8 = 0x00;
pub const EN_AA: u8 = 0x01;
pub const EN_RXADDR: u8 = 0x02;
pub const SETUP_AW: u8 = 0x03;
pub const SETUP_RETR: u8 = 0x04;
pub const RF_CH: u8 = 0x05;
pub const RF_SETUP: u8 = 0x06;
pub const STATUS: u8 = 0x07;
pub const OBSERVE_TX: u8 = 0x08;
pub const RX_ADDR_P0: u8 = 0x0A;
pub const TX_ADDR: u8 = 0x10;
pub const RX_PW_P0: u8 = 0x11;
pub const FIFO_STATUS: u8 = 0x17;
pub const DYNPD: u8 = 0x1C;
pub const FEATURE: u8 = 0x1D;

// CONFIG
pub const EN_CRC: u8 = 1 << 3;
pub const CRCO: u8 = 1 << 2;
pub const PWR_UP: u8 = 1 << 1;
pub const PRIM_RX: u8 = 1 << 0;

// STATUS
pub const RX_DR: u8 = 1 << 6;
pub const TX_DS: u8 = 1 << 5;
pub const MAX_RT: u8 = 1 << 4;
pub const RX_P_NO_SHIFT: u8 = 1;
pub const RX_P_NO_MASK: u8 = 0x0E;
/// RX_P_NO value when the RX FIFO is empty
pub const RX_P_NO_EMPTY: u8 = 0x07;
pub const TX_FULL: u8 = 1 << 0;

// FIFO_STATUS
pub const FIFO_TX_FULL: u8 = 1 << 5;
pub const FIFO_TX_EMPTY: u8 = 1 << 4;
pub const FIFO_RX_FULL: u8 = 1 << 1;
pub const FIFO_RX_EMPTY: u8 = 1 << 0;

// RF_SETUP
/// RF_PWR = 11: 0 dBm
pub const RF_PWR_MAX: u8 = 0x06;

// SETUP_RETR
pub const ARD_SHIFT: u8 = 4;

// OBSERVE_TX
pub const PLOS_CNT_SHIFT: u8 = 4;
pub const ARC_CNT_MASK: u8 = 0x0F;

/// Number of RX pipes
pub const PIPE_COUNT: u8 = 6;

/// Largest static payload
pub const MAX_PAYLOAD_SIZE: usize = 32;

/// Highest RF channel (2400 + 125 MHz)
pub const MAX_CHANNEL: u8 = 125;

/// Highest ARD / ARC field value
pub const MAX_RETRY_FIELD: u8 = 15;

/// SETUP_AW encoding of an address width in bytes (3..=5)
pub fn setup_aw_for(width: usize) -> Option<u8> {
    match width {
        3..=5 => Some((width - 2) as u8),
        _ => None,
    }
}

/// Address width in bytes for a SETUP_AW value
pub fn width_for_setup_aw(value: u8) -> Option<usize> {
    match value & 0x03 {
        0 => None,
        aw => Some(usize::from(aw) + 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_aw_encoding() {
        assert_eq!(setup_aw_for(3), Some(0b01));
        assert_eq!(setup_aw_for(5), Some(0b11));
        assert_eq!(setup_aw_for(6), None);
        assert_eq!(setup_aw_for(2), None);
        for width in 3..=5 {
            assert_eq!(width_for_setup_aw(setup_aw_for(width).unwrap()), Some(width));
        }
        assert_eq!(width_for_setup_aw(0), None);
    }

    #[test]
    fn test_commands_do_not_collide_with_register_addresses() {
        assert_eq!(W_REGISTER | FEATURE, 0x3D);
        assert_eq!(R_REGISTER | FIFO_STATUS, 0x17);
        assert!(R_RX_PAYLOAD > W_REGISTER | REGISTER_MASK);
    }
}
