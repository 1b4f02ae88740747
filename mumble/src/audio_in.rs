//! Incoming audio pipeline: a per-speaker jitter buffer.
//!
//! The real protocol prefixes a server→client audio frame with the
//! speaker's session id, ahead of the sequence varint that
//! [`crate::audio_frame::AudioFrame`] starts parsing from (that session
//! prefix never appears on the outgoing, client→server side, which is why
//! it isn't part of `AudioFrame` itself). [`split_session`] peels it off
//! before handing the remainder to `AudioFrame::decode`, which is how a
//! single opcode-1 tunnel gets demultiplexed into one jitter buffer per
//! speaker.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio_frame::AudioFrame;
use crate::codec::AudioDecoder;
use crate::error::{Error, Result};
use crate::varint;

pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Splits the session id off the front of a received opcode-1 payload,
/// returning `(session, remaining_bytes)` where `remaining_bytes` is in the
/// shape [`AudioFrame::decode`] expects.
pub fn split_session(data: &[u8]) -> Result<(u32, Vec<u8>)> {
    let &header = data
        .first()
        .ok_or_else(|| Error::Protocol("incoming audio frame: empty input".into()))?;
    let (session, n) = varint::decode(&data[1..])?;

    let mut remainder = Vec::with_capacity(data.len() - n);
    remainder.push(header);
    remainder.extend_from_slice(&data[1 + n..]);

    Ok((session as u32, remainder))
}

struct PendingFrame {
    sequence: u64,
    payload: Vec<u8>,
    final_frame: bool,
    position: Option<(f32, f32, f32)>,
    insertion_order: u64,
}

impl PartialEq for PendingFrame {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence && self.insertion_order == other.insertion_order
    }
}
impl Eq for PendingFrame {}

/// Ordered by sequence first; on a tie the earlier-inserted frame sorts
/// first.
impl Ord for PendingFrame {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.sequence
            .cmp(&other.sequence)
            .then(self.insertion_order.cmp(&other.insertion_order))
    }
}
impl PartialOrd for PendingFrame {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Min-heap wrapper: `BinaryHeap` is a max-heap, so every entry is reversed
/// at insertion/peek time via `std::cmp::Reverse`.
type MinHeap = BinaryHeap<std::cmp::Reverse<PendingFrame>>;

pub enum DrainOutcome {
    Decoded { pcm: Vec<i16>, position: Option<(f32, f32, f32)> },
    Concealed { pcm: Vec<i16> },
}

/// Per-speaker reordering state.
pub struct JitterBuffer<D> {
    decoder: D,
    heap: MinHeap,
    next_expected: Option<u64>,
    next_insertion: u64,
    saw_final: bool,
}

impl<D: AudioDecoder> JitterBuffer<D> {
    pub fn new(decoder: D) -> Self {
        JitterBuffer {
            decoder,
            heap: BinaryHeap::new(),
            next_expected: None,
            next_insertion: 0,
            saw_final: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_expected.is_some() || !self.heap.is_empty()
    }

    pub fn saw_final(&self) -> bool {
        self.saw_final
    }

    /// Validates and enqueues one arriving frame.
    pub fn push(&mut self, frame: AudioFrame) {
        // Step 1: validate the payload decodes to a sample count at all; a
        // frame that fails this check is dropped outright.
        if self.decoder.sample_size(&frame.payload).is_err() {
            return;
        }

        let order = self.next_insertion;
        self.next_insertion += 1;

        self.heap.push(std::cmp::Reverse(PendingFrame {
            sequence: frame.sequence,
            payload: frame.payload,
            final_frame: frame.final_frame,
            position: frame.position,
            insertion_order: order,
        }));
    }

    /// One iteration of the drain loop. Returns `None` once the
    /// heap is empty; the caller decides whether that means "done" (heap
    /// drained and `saw_final()`/idle) or "wait for more frames".
    pub fn drain_one(&mut self) -> Result<Option<(DrainOutcome, Duration)>> {
        // The very first drain establishes the reordering point from
        // whichever sequence is lowest among everything buffered during the
        // startup delay, not from whichever frame happened to arrive (i.e.
        // get pushed) first — those are not the same thing once frames show
        // up out of order.
        let next_expected = match self.next_expected {
            Some(n) => n,
            None => match self.heap.peek() {
                Some(std::cmp::Reverse(top)) => top.sequence,
                None => return Ok(None),
            },
        };

        while let Some(std::cmp::Reverse(top)) = self.heap.peek() {
            if top.sequence < next_expected {
                self.heap.pop();
            } else {
                break;
            }
        }

        let top_sequence = match self.heap.peek() {
            Some(std::cmp::Reverse(top)) => top.sequence,
            None => return Ok(None),
        };

        if top_sequence > next_expected {
            let pcm = self.decoder.decode_lost()?;
            let frames = frames_in(pcm.len());
            self.next_expected = Some(top_sequence);
            let duration = wall_clock(pcm.len());
            let _ = frames;
            return Ok(Some((DrainOutcome::Concealed { pcm }, duration)));
        }

        let std::cmp::Reverse(frame) = self.heap.pop().unwrap();
        if frame.final_frame {
            self.saw_final = true;
        }

        let pcm = self.decoder.decode(&frame.payload)?;
        let frames = frames_in(pcm.len()).max(1);
        self.next_expected = Some(frame.sequence + frames as u64);
        let duration = wall_clock(pcm.len());

        Ok(Some((
            DrainOutcome::Decoded { pcm, position: frame.position },
            duration,
        )))
    }
}

fn frames_in(samples: usize) -> usize {
    (samples + 479) / 480
}

fn wall_clock(samples: usize) -> Duration {
    Duration::from_secs_f64(samples as f64 / 48_000.0)
}

/// Drives one speaker's jitter buffer: buffers arrivals for the startup
/// delay, then drains on a fixed schedule, delivering each
/// outcome to `deliver`. Terminates when the heap empties and either the
/// final bit was seen or `idle_timeout` elapses without a new frame.
pub async fn run<D, F>(
    mut buffer: JitterBuffer<D>,
    mut frames_rx: mpsc::Receiver<AudioFrame>,
    mut deliver: F,
    startup_delay: Duration,
    idle_timeout: Duration,
) where
    D: AudioDecoder,
    F: FnMut(DrainOutcome),
{
    let deadline = tokio::time::Instant::now() + startup_delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            frame = frames_rx.recv() => match frame {
                Some(f) => buffer.push(f),
                None => return,
            }
        }
    }

    loop {
        match buffer.drain_one() {
            Ok(Some((outcome, duration))) => {
                deliver(outcome);
                tokio::time::sleep(duration).await;
                while let Ok(frame) = frames_rx.try_recv() {
                    buffer.push(frame);
                }
            }
            Ok(None) => {
                if buffer.saw_final() {
                    break;
                }
                match tokio::time::timeout(idle_timeout, frames_rx.recv()).await {
                    Ok(Some(frame)) => buffer.push(frame),
                    Ok(None) | Err(_) => break,
                }
            }
            Err(e) => {
                log::warn!("jitter buffer decode error: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDecoder {
        samples_per_frame: usize,
    }

    impl AudioDecoder for StubDecoder {
        fn sample_size(&self, payload: &[u8]) -> Result<usize> {
            if payload.is_empty() {
                Err(Error::Codec("empty payload".into()))
            } else {
                Ok(self.samples_per_frame)
            }
        }

        fn decode(&mut self, _payload: &[u8]) -> Result<Vec<i16>> {
            Ok(vec![0i16; self.samples_per_frame])
        }

        fn decode_lost(&mut self) -> Result<Vec<i16>> {
            Ok(vec![0i16; self.samples_per_frame])
        }
    }

    fn frame(sequence: u64, final_frame: bool) -> AudioFrame {
        AudioFrame {
            format: crate::audio_frame::FORMAT_OPUS,
            target: 0,
            sequence,
            final_frame,
            payload: vec![1, 2, 3],
            position: None,
        }
    }

    #[test]
    fn in_order_frames_drain_without_concealment() {
        let mut buf = JitterBuffer::new(StubDecoder { samples_per_frame: 480 });
        buf.push(frame(0, false));
        buf.push(frame(1, false));
        buf.push(frame(2, true));

        let mut decoded = 0;
        let mut concealed = 0;
        while let Some((outcome, _)) = buf.drain_one().unwrap() {
            match outcome {
                DrainOutcome::Decoded { .. } => decoded += 1,
                DrainOutcome::Concealed { .. } => concealed += 1,
            }
        }

        assert_eq!(decoded, 3);
        assert_eq!(concealed, 0);
        assert!(buf.saw_final());
    }

    #[test]
    fn gap_triggers_concealment() {
        let mut buf = JitterBuffer::new(StubDecoder { samples_per_frame: 480 });
        buf.push(frame(0, false));
        buf.push(frame(2, false));

        let (outcome, _) = buf.drain_one().unwrap().unwrap();
        assert!(matches!(outcome, DrainOutcome::Decoded { .. }));

        let (outcome, _) = buf.drain_one().unwrap().unwrap();
        assert!(matches!(outcome, DrainOutcome::Concealed { .. }));

        let (outcome, _) = buf.drain_one().unwrap().unwrap();
        assert!(matches!(outcome, DrainOutcome::Decoded { .. }));
    }

    #[test]
    fn out_of_arrival_order_frames_still_drain_in_sequence_order() {
        let mut buf = JitterBuffer::new(StubDecoder { samples_per_frame: 480 });
        // Arrival order is 2, 0, 1, 4 — sequence 3 never shows up. The
        // reordering point must come from the lowest buffered sequence (0),
        // not from whichever frame happened to arrive first (2), or 0 and 1
        // get treated as stale and dropped.
        buf.push(frame(2, false));
        buf.push(frame(0, false));
        buf.push(frame(1, false));
        buf.push(frame(4, true));

        let mut outcomes = Vec::new();
        while let Some((outcome, _)) = buf.drain_one().unwrap() {
            outcomes.push(match outcome {
                DrainOutcome::Decoded { .. } => "decoded",
                DrainOutcome::Concealed { .. } => "concealed",
            });
        }

        assert_eq!(outcomes, vec!["decoded", "decoded", "decoded", "concealed", "decoded"]);
        assert!(buf.saw_final());
    }

    #[test]
    fn stale_frame_is_dropped() {
        let mut buf = JitterBuffer::new(StubDecoder { samples_per_frame: 480 });
        buf.push(frame(5, false));
        let (_, _) = buf.drain_one().unwrap().unwrap();
        // next_expected is now 6; a frame with an older sequence is stale.
        buf.push(frame(3, false));
        assert!(buf.drain_one().unwrap().is_none());
    }

    #[test]
    fn split_session_peels_leading_varint() {
        let mut wire = Vec::new();
        wire.push((crate::audio_frame::FORMAT_OPUS << 5) | 0);
        varint::encode(42, &mut wire);
        let frame_start = wire.len();
        let inner = frame(7, false).encode();
        wire.extend_from_slice(&inner[1..]);

        let (session, remainder) = split_session(&wire).unwrap();
        assert_eq!(session, 42);
        let decoded = AudioFrame::decode(&remainder).unwrap();
        assert_eq!(decoded.sequence, 7);
        let _ = frame_start;
    }
}
