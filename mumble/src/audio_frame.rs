//! The audio sub-frame carried under control opcode 1. This is the header
//! format tunneled over TCP instead of the protocol's plain UDP datagram —
//! this crate never opens a voice UDP socket.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::varint;

/// Bit 0x2000 of the length varint marks the last frame of an utterance and
/// triggers decoder/encoder reset on both ends.
const FINAL_BIT: u64 = 0x2000;

pub const FORMAT_OPUS: u8 = 4;

pub const TARGET_NORMAL: u8 = 0;
pub const TARGET_LOOPBACK: u8 = 31;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Upper 3 bits of the header byte. Only `FORMAT_OPUS` is produced by
    /// this crate, but other values decode without error — an unexpected
    /// format only becomes a `Protocol` error at the point a handler tries
    /// to interpret the payload, not at frame parse time.
    pub format: u8,
    /// Lower 5 bits of the header byte: 0 = normal, 1-30 = voice target,
    /// 31 = server loopback.
    pub target: u8,
    pub sequence: u64,
    /// The 0x2000 bit of the length varint.
    pub final_frame: bool,
    pub payload: Vec<u8>,
    /// Present iff exactly 12 trailing bytes followed the payload.
    pub position: Option<(f32, f32, f32)>,
}

impl AudioFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.payload.len());
        out.push(((self.format & 0x7) << 5) | (self.target & 0x1F));
        varint::encode(self.sequence, &mut out);

        let mut length = self.payload.len() as u64;
        if self.final_frame {
            length |= FINAL_BIT;
        }
        varint::encode(length, &mut out);

        out.extend_from_slice(&self.payload);

        if let Some((x, y, z)) = self.position {
            let mut pos = [0u8; 12];
            LittleEndian::write_f32(&mut pos[0..4], x);
            LittleEndian::write_f32(&mut pos[4..8], y);
            LittleEndian::write_f32(&mut pos[8..12], z);
            out.extend_from_slice(&pos);
        }

        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let &header = data
            .first()
            .ok_or_else(|| Error::Protocol("audio frame: empty input".into()))?;

        let format = (header >> 5) & 0x7;
        let target = header & 0x1F;

        let mut pos = 1usize;
        let (sequence, n) = varint::decode(&data[pos..])?;
        pos += n;

        let (raw_length, n) = varint::decode(&data[pos..])?;
        pos += n;

        let final_frame = raw_length & FINAL_BIT != 0;
        let length = (raw_length & !FINAL_BIT) as usize;

        let payload_end = pos
            .checked_add(length)
            .ok_or_else(|| Error::Protocol("audio frame: length overflow".into()))?;
        if payload_end > data.len() {
            return Err(Error::Protocol(format!(
                "audio frame: declared length {length} exceeds remaining {} bytes",
                data.len() - pos
            )));
        }

        let payload = data[pos..payload_end].to_vec();
        let trailing = &data[payload_end..];

        let position = if trailing.len() == 12 {
            Some((
                LittleEndian::read_f32(&trailing[0..4]),
                LittleEndian::read_f32(&trailing[4..8]),
                LittleEndian::read_f32(&trailing[8..12]),
            ))
        } else {
            None
        };

        Ok(AudioFrame {
            format,
            target,
            sequence,
            final_frame,
            payload,
            position,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> Vec<AudioFrame> {
        let mut out = Vec::new();

        for &format in &[0u8, 4, 7] {
            for &target in &[0u8, 1, 30, 31] {
                for &sequence in &[0u64, 1, 127, 128, 16383, 16384, 5_000_000] {
                    for &final_frame in &[false, true] {
                        for payload in [vec![], vec![0xAB; 3], vec![0x42; 160]] {
                            out.push(AudioFrame {
                                format,
                                target,
                                sequence,
                                final_frame,
                                payload,
                                position: None,
                            });
                        }
                    }
                }
            }
        }

        out.push(AudioFrame {
            format: FORMAT_OPUS,
            target: TARGET_NORMAL,
            sequence: 42,
            final_frame: false,
            payload: vec![1, 2, 3],
            position: Some((1.5, -2.25, 0.0)),
        });

        out
    }

    #[test]
    fn roundtrip_is_identity() {
        for frame in frames() {
            let encoded = frame.encode();
            let decoded = AudioFrame::decode(&encoded).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn final_bit_strips_cleanly_from_length() {
        let frame = AudioFrame {
            format: FORMAT_OPUS,
            target: TARGET_NORMAL,
            sequence: 0,
            final_frame: true,
            payload: vec![9; 42],
            position: None,
        };
        let encoded = frame.encode();
        let decoded = AudioFrame::decode(&encoded).unwrap();
        assert!(decoded.final_frame);
        assert_eq!(decoded.payload.len(), 42);
    }

    #[test]
    fn absent_position_when_not_exactly_12_trailing_bytes() {
        let mut encoded = AudioFrame {
            format: FORMAT_OPUS,
            target: TARGET_NORMAL,
            sequence: 0,
            final_frame: false,
            payload: vec![1, 2, 3],
            position: None,
        }
        .encode();
        encoded.extend_from_slice(&[0u8; 5]);
        let decoded = AudioFrame::decode(&encoded).unwrap();
        assert_eq!(decoded.position, None);
        // the 5 stray bytes are not part of the payload either
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }
}
