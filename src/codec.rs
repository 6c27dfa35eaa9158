// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-width MSB-first / LSB-first integer (de)serialization.
//!
//! Every leaf value is stored at a declared byte width of 1, 2, or 4. A
//! `count`-byte MSB-first window is the last `count` bytes of the value's
//! big-endian representation; a `count`-byte LSB-first window is the first
//! `count` bytes of its little-endian representation. Decoding is the
//! inverse: the input bytes are placed into the low-order (MSB-first) or
//! high-order (LSB-first) position of a 4-byte buffer and the remainder is
//! zero-extended.

/// Serializes `value` into `out` as the `out.len()`-byte MSB-first window.
///
/// `out.len()` must be 1, 2, or 4.
pub fn u32_to_bytes_msb(value: u32, out: &mut [u8]) {
    let be = value.to_be_bytes();
    let count = out.len();
    out.copy_from_slice(&be[4 - count..]);
}

/// Deserializes an MSB-first byte window into a zero-extended `u32`.
///
/// `bytes.len()` must be 1, 2, or 4.
pub fn bytes_to_u32_msb(bytes: &[u8]) -> u32 {
    let mut be = [0u8; 4];
    let count = bytes.len();
    be[4 - count..].copy_from_slice(bytes);
    u32::from_be_bytes(be)
}

/// Serializes `value` into `out` as the `out.len()`-byte LSB-first window.
///
/// `out.len()` must be 1, 2, or 4.
pub fn u32_to_bytes_lsb(value: u32, out: &mut [u8]) {
    let le = value.to_le_bytes();
    let count = out.len();
    out.copy_from_slice(&le[..count]);
}

/// Deserializes an LSB-first byte window into a zero-extended `u32`.
///
/// `bytes.len()` must be 1, 2, or 4.
pub fn bytes_to_u32_lsb(bytes: &[u8]) -> u32 {
    let mut le = [0u8; 4];
    let count = bytes.len();
    le[..count].copy_from_slice(bytes);
    u32::from_le_bytes(le)
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    #[test]
    fn msb_round_trips_at_every_width() {
        for &(value, count) in &[(0x12u32, 1), (0x3456, 2), (0x789A_BCDE, 4)] {
            let mut buf = [0u8; 4];
            u32_to_bytes_msb(value, &mut buf[..count]);
            assert_eq!(bytes_to_u32_msb(&buf[..count]), value);
        }
    }

    #[test]
    fn msb_matches_hand_computed_bytes() {
        let mut buf = [0u8; 2];
        u32_to_bytes_msb(0x1234_5678, &mut buf);
        assert_eq!(buf, [0x56, 0x78]);
    }

    #[test]
    fn lsb_matches_hand_computed_bytes() {
        let mut buf = [0u8; 2];
        u32_to_bytes_lsb(0x1234_5678, &mut buf);
        assert_eq!(buf, [0x78, 0x56]);
    }

    #[test]
    fn lsb_round_trips_at_every_width() {
        for &(value, count) in &[(0xAB, 1), (0xCDEF, 2), (0x1122_3344, 4)] {
            let mut buf = [0u8; 4];
            u32_to_bytes_lsb(value, &mut buf[..count]);
            assert_eq!(bytes_to_u32_lsb(&buf[..count]), value);
        }
    }

    #[test]
    fn msb_one_byte_truncates_high_bits() {
        let mut buf = [0u8; 1];
        u32_to_bytes_msb(0x1234_5678, &mut buf);
        assert_eq!(buf, [0x78]);
        assert_eq!(bytes_to_u32_msb(&buf), 0x78);
    }
}
