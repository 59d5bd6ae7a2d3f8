//! # Probe Codec
//!
//! A probe carries a 32-bit tick count on the air: the low 32 bits of the
//! sender's millisecond timestamp, little-endian. Larger timestamps wrap
//! modulo 2^32, so both ends must treat the value as a tick count and do
//! their arithmetic with wrapping 32-bit subtraction.

use crate::error::{PeriphLinkError, Result};

/// Bytes in a probe payload
pub const PROBE_SIZE: usize = 4;

/// Encode the low 32 bits of `value`, little-endian
///
/// # Examples
///
/// ```
/// use periphlink::radio::codec::encode_timestamp;
///
/// assert_eq!(encode_timestamp(1000), [0xE8, 0x03, 0x00, 0x00]);
/// ```
pub fn encode_timestamp(value: u64) -> [u8; PROBE_SIZE] {
    (value as u32).to_le_bytes()
}

/// Decode a probe, zero-extending to 64 bits
///
/// # Examples
///
/// ```
/// use periphlink::radio::codec::{decode_timestamp, encode_timestamp};
///
/// assert_eq!(decode_timestamp(encode_timestamp(123_456)), 123_456);
/// assert_eq!(decode_timestamp(encode_timestamp(1 << 32)), 0);
/// ```
pub fn decode_timestamp(bytes: [u8; PROBE_SIZE]) -> u64 {
    u64::from(u32::from_le_bytes(bytes))
}

/// Decode the probe at the start of a received payload
///
/// Bytes past the first four (static-payload padding) are ignored.
///
/// # Errors
///
/// `PayloadTooShort` if fewer than four bytes were received.
pub fn decode_payload(payload: &[u8]) -> Result<u64> {
    let bytes: [u8; PROBE_SIZE] = payload
        .get(..PROBE_SIZE)
        .and_then(|head| head.try_into().ok())
        .ok_or(PeriphLinkError::PayloadTooShort(payload.len()))?;
    Ok(decode_timestamp(bytes))
}

/// Milliseconds elapsed between two tick counts, across a 32-bit wrap
pub fn ticks_between(earlier: u64, later: u64) -> u64 {
    u64::from((later as u32).wrapping_sub(earlier as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian_low_word() {
        assert_eq!(encode_timestamp(0x1122_3344), [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(
            encode_timestamp(0xAABB_CCDD_1122_3344),
            [0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn test_round_trip_within_32_bits() {
        for value in [0u64, 1, 1000, 0xFFFF, 0x8000_0000, u64::from(u32::MAX)] {
            assert_eq!(decode_timestamp(encode_timestamp(value)), value);
        }
    }

    #[test]
    fn test_values_above_32_bits_truncate() {
        for value in [1u64 << 32, (1 << 32) + 1000, u64::MAX, 0x1234_5678_9ABC_DEF0] {
            assert_eq!(decode_timestamp(encode_timestamp(value)), value % (1 << 32));
        }
    }

    #[test]
    fn test_decode_payload_ignores_padding() {
        let mut payload = encode_timestamp(4242).to_vec();
        payload.extend_from_slice(&[0xFF; 28]);
        assert_eq!(decode_payload(&payload).unwrap(), 4242);
    }

    #[test]
    fn test_decode_payload_too_short() {
        assert!(matches!(
            decode_payload(&[0x01, 0x02, 0x03]),
            Err(PeriphLinkError::PayloadTooShort(3))
        ));
        assert!(decode_payload(&[]).is_err());
    }

    #[test]
    fn test_ticks_between_wraps() {
        assert_eq!(ticks_between(1000, 1150), 150);
        assert_eq!(ticks_between(u64::from(u32::MAX) - 9, 10), 20);
        // Only the low words matter
        assert_eq!(ticks_between(1 << 32, (1 << 32) + 5), 5);
    }
}
