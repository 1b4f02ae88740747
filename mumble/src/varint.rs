//! Mumble's tagged variable-length integer encoding. This is distinct
//! from protobuf's varint — it is the packed
//! big-endian format used by the audio sub-protocol for sequence numbers
//! and payload lengths.
//!
//! Only the non-negative 1-5 byte forms are produced by this crate (the
//! audio header never needs more than 32 bits), but decoding recognizes the
//! full tag space so a peer using the 64-bit/negative forms is rejected
//! with a clear error rather than silently misread.

use crate::error::{Error, Result};

/// Encodes `value` into Mumble's varint form and appends it to `buf`.
/// Returns the number of bytes written.
pub fn encode(value: u64, buf: &mut Vec<u8>) -> usize {
    if value < 0x80 {
        buf.push(value as u8);
        1
    } else if value < 0x4000 {
        buf.push(((value >> 8) as u8) | 0x80);
        buf.push((value & 0xFF) as u8);
        2
    } else if value < 0x20_0000 {
        buf.push(((value >> 16) as u8) | 0xC0);
        buf.push(((value >> 8) & 0xFF) as u8);
        buf.push((value & 0xFF) as u8);
        3
    } else if value < 0x1000_0000 {
        buf.push(((value >> 24) as u8) | 0xE0);
        buf.push(((value >> 16) & 0xFF) as u8);
        buf.push(((value >> 8) & 0xFF) as u8);
        buf.push((value & 0xFF) as u8);
        4
    } else {
        buf.push(0xF0);
        buf.push(((value >> 24) & 0xFF) as u8);
        buf.push(((value >> 16) & 0xFF) as u8);
        buf.push(((value >> 8) & 0xFF) as u8);
        buf.push((value & 0xFF) as u8);
        5
    }
}

/// Decodes one varint from the front of `data`, returning the value and the
/// number of bytes consumed.
pub fn decode(data: &[u8]) -> Result<(u64, usize)> {
    let &first = data.first().ok_or_else(|| Error::Protocol("varint: empty input".into()))?;

    if first & 0x80 == 0 {
        Ok((first as u64, 1))
    } else if first & 0xC0 == 0x80 {
        let b1 = *data.get(1).ok_or_else(too_short)?;
        let value = (((first & 0x3F) as u64) << 8) | b1 as u64;
        Ok((value, 2))
    } else if first & 0xE0 == 0xC0 {
        let rest = data.get(1..3).ok_or_else(too_short)?;
        let value = (((first & 0x1F) as u64) << 16) | ((rest[0] as u64) << 8) | rest[1] as u64;
        Ok((value, 3))
    } else if first & 0xF0 == 0xE0 {
        let rest = data.get(1..4).ok_or_else(too_short)?;
        let value = (((first & 0x0F) as u64) << 24)
            | ((rest[0] as u64) << 16)
            | ((rest[1] as u64) << 8)
            | rest[2] as u64;
        Ok((value, 4))
    } else if first == 0xF0 {
        let rest = data.get(1..5).ok_or_else(too_short)?;
        let value = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as u64;
        Ok((value, 5))
    } else {
        Err(Error::Protocol(format!(
            "varint: unsupported tag byte 0x{first:02x} (64-bit/negative forms are not used by this crate)"
        )))
    }
}

fn too_short() -> Error {
    Error::Protocol("varint: truncated input".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_boundaries() {
        let cases: &[u64] = &[
            0,
            1,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            0x1F_FFFF,
            0x20_0000,
            0x0FFF_FFFF,
            0x1000_0000,
            0xFFFF_FFFF,
        ];

        for &n in cases {
            let mut buf = Vec::new();
            let written = encode(n, &mut buf);
            assert_eq!(written, buf.len());
            let (decoded, consumed) = decode(&buf).unwrap();
            assert_eq!(decoded, n, "roundtrip failed for {n}");
            assert_eq!(consumed, written);
        }
    }

    #[test]
    fn roundtrip_sweep() {
        // Representative sweep across [0, 2^31 - 1], including every byte-
        // length boundary, per spec testable property #3.
        let mut n: u64 = 0;
        while n < (1u64 << 31) {
            let mut buf = Vec::new();
            encode(n, &mut buf);
            let (decoded, consumed) = decode(&buf).unwrap();
            assert_eq!(decoded, n);
            assert_eq!(consumed, buf.len());
            n = n.saturating_add(104_729).saturating_add(n / 7);
        }
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(decode(&[0x80]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn decode_rejects_64_bit_forms() {
        assert!(decode(&[0xF8, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
