//! Opus codec adapter. This module defines the capability traits the
//! audio pipelines program against, plus one concrete `audiopus`-backed
//! implementation.

use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::packet::Packet;
use audiopus::{Application, Channels, MutSignals, SampleRate};

use crate::error::{Error, Result};

/// One 48 kHz frame at the longest interval this crate emits (60 ms).
pub const AUDIO_MAX_FRAME_SIZE: usize = 2880;

pub trait AudioEncoder: Send {
    /// Encodes one PCM frame, writing at most `max_bytes` of opus payload.
    fn encode(&mut self, pcm: &[i16], max_bytes: usize) -> Result<Vec<u8>>;

    /// Resets internal state between utterances.
    fn reset(&mut self) -> Result<()>;
}

pub trait AudioDecoder: Send {
    /// Cheap header inspection used by the jitter buffer to learn a frame's
    /// sample count without fully decoding it.
    fn sample_size(&self, payload: &[u8]) -> Result<usize>;

    /// Full decode of a received payload, up to `AUDIO_MAX_FRAME_SIZE`.
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>>;

    /// Loss concealment: produce a synthetic frame with no payload.
    fn decode_lost(&mut self) -> Result<Vec<i16>>;
}

pub struct OpusAudioEncoder {
    inner: OpusEncoder,
}

impl OpusAudioEncoder {
    pub fn new() -> Result<Self> {
        let inner = OpusEncoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| Error::Codec(format!("failed to create opus encoder: {e}")))?;
        Ok(OpusAudioEncoder { inner })
    }
}

impl AudioEncoder for OpusAudioEncoder {
    fn encode(&mut self, pcm: &[i16], max_bytes: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        let len = self
            .inner
            .encode(pcm, &mut buf)
            .map_err(|e| Error::Codec(format!("opus encode failed: {e}")))?;
        buf.truncate(len);
        Ok(buf)
    }

    fn reset(&mut self) -> Result<()> {
        self.inner
            .reset_state()
            .map_err(|e| Error::Codec(format!("opus encoder reset failed: {e}")))
    }
}

pub struct OpusAudioDecoder {
    inner: OpusDecoder,
}

impl OpusAudioDecoder {
    pub fn new() -> Result<Self> {
        let inner = OpusDecoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| Error::Codec(format!("failed to create opus decoder: {e}")))?;
        Ok(OpusAudioDecoder { inner })
    }
}

impl AudioDecoder for OpusAudioDecoder {
    fn sample_size(&self, payload: &[u8]) -> Result<usize> {
        let packet = Packet::try_from(payload)
            .map_err(|e| Error::Codec(format!("not a valid opus packet: {e}")))?;
        packet
            .num_samples(SampleRate::Hz48000)
            .map_err(|e| Error::Codec(format!("failed to read opus packet header: {e}")))
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>> {
        let mut out = vec![0i16; AUDIO_MAX_FRAME_SIZE];
        let packet = Packet::try_from(payload)
            .map_err(|e| Error::Codec(format!("not a valid opus packet: {e}")))?;
        let signals = MutSignals::try_from(&mut out)
            .map_err(|e| Error::Codec(format!("invalid decode buffer: {e}")))?;
        let samples = self
            .inner
            .decode(Some(packet), signals, false)
            .map_err(|e| Error::Codec(format!("opus decode failed: {e}")))?;
        out.truncate(samples);
        Ok(out)
    }

    fn decode_lost(&mut self) -> Result<Vec<i16>> {
        let mut out = vec![0i16; AUDIO_MAX_FRAME_SIZE];
        let signals = MutSignals::try_from(&mut out)
            .map_err(|e| Error::Codec(format!("invalid decode buffer: {e}")))?;
        let samples = self
            .inner
            .decode(None, signals, false)
            .map_err(|e| Error::Codec(format!("opus concealment decode failed: {e}")))?;
        out.truncate(samples);
        Ok(out)
    }
}
