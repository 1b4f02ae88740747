//! Outgoing audio pipeline: a cadence ticker driven from an external PCM
//! channel, writing encoded frames through [`crate::transport::ConnWriter`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::audio_frame::FORMAT_OPUS;
use crate::codec::AudioEncoder;
use crate::config::AudioInterval;
use crate::error::Result;
use crate::transport::ConnWriter;

/// One chunk handed to the pipeline by the application. `Last` marks the
/// final buffer of an utterance: it is sent with the final bit set and the
/// encoder is reset immediately afterward.
pub enum AudioChunk {
    More(Vec<i16>),
    Last(Vec<i16>),
}

pub fn frame_samples(interval: AudioInterval) -> usize {
    (interval.as_duration().as_millis() as usize / 10) * 480
}

pub struct OutgoingAudio<W> {
    writer: ConnWriter<W>,
    encoder: Box<dyn AudioEncoder>,
    sequence: u32,
    data_bytes: usize,
    interval: Duration,
}

impl<W> OutgoingAudio<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        writer: ConnWriter<W>,
        encoder: Box<dyn AudioEncoder>,
        interval: AudioInterval,
        data_bytes: usize,
    ) -> Self {
        OutgoingAudio {
            writer,
            encoder,
            sequence: 0,
            data_bytes,
            interval: interval.as_duration(),
        }
    }

    /// Sequence numbers wrap modulo 2^31.
    fn next_sequence(&mut self) -> u32 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1) % (1 << 31);
        seq
    }

    async fn send_frame(
        &mut self,
        pcm: &[i16],
        target: u8,
        last: bool,
        position: Option<(f32, f32, f32)>,
    ) -> Result<()> {
        let payload = self.encoder.encode(pcm, self.data_bytes)?;
        let sequence = self.next_sequence();
        self.writer
            .write_audio(FORMAT_OPUS, target, sequence as u64, last, payload, position)
            .await?;
        if last {
            self.encoder.reset()?;
        }
        Ok(())
    }

    /// Runs the cadence-driven pipeline until `pcm_rx` closes. `target`
    /// and `position` are read fresh every tick so the application can
    /// change them mid-stream (e.g. moving voice target, updating
    /// positional audio) without restarting the pipeline. Loopback (id 31)
    /// is never special-cased — the frame is always written regardless of
    /// target.
    ///
    /// Pausing is modeled by simply not calling this function's
    /// ticker: the caller drops into a separate wait and re-invokes `run`
    /// (or, more precisely, gates delivery into `pcm_rx`) to resume — the
    /// encoder and sequence counter live on `self` across that gap, so the
    /// stream picks back up unbroken.
    pub async fn run(
        mut self,
        mut pcm_rx: mpsc::Receiver<AudioChunk>,
        target: Arc<AtomicU8>,
        position: Arc<std::sync::Mutex<Option<(f32, f32, f32)>>>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let chunk = match pcm_rx.recv().await {
                Some(chunk) => chunk,
                None => break,
            };

            let t = target.load(Ordering::Relaxed);
            let pos = *position.lock().unwrap();

            match chunk {
                AudioChunk::More(pcm) => self.send_frame(&pcm, t, false, pos).await?,
                AudioChunk::Last(pcm) => {
                    self.send_frame(&pcm, t, true, pos).await?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_samples_scales_with_interval() {
        assert_eq!(frame_samples(AudioInterval::Ms10), 480);
        assert_eq!(frame_samples(AudioInterval::Ms20), 960);
        assert_eq!(frame_samples(AudioInterval::Ms60), 2880);
    }

    struct NullWriter;
    impl tokio::io::AsyncRead for NullWriter {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Pending
        }
    }
    impl tokio::io::AsyncWrite for NullWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    struct StubEncoder;
    impl AudioEncoder for StubEncoder {
        fn encode(&mut self, pcm: &[i16], _max_bytes: usize) -> Result<Vec<u8>> {
            Ok(vec![0u8; pcm.len() / 48])
        }
        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn sequence_numbers_increase_monotonically() {
        let (_reader, writer) = crate::transport::split(NullWriter, 0, Duration::from_secs(1));
        let mut audio = OutgoingAudio::new(writer, Box::new(StubEncoder), AudioInterval::Ms10, 40);

        assert_eq!(audio.next_sequence(), 0);
        assert_eq!(audio.next_sequence(), 1);
        assert_eq!(audio.next_sequence(), 2);
    }
}
