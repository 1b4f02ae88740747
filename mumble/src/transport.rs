//! Framed TCP/TLS transport: a 6-byte header (`u16` type, `u32` length,
//! both big-endian) in front of every packet. Type 1 carries an audio
//! sub-frame; every other type carries a protobuf payload dispatched by
//! the opcode table in [`crate::control`].

use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::audio_frame::AudioFrame;
use crate::error::{Result, TransportError};

pub const DEFAULT_MAX_PACKET_BYTES: u32 = 10 * 1024 * 1024;
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// The read side of a framed connection. Owned exclusively by the reader
/// task — there is no way to clone or share it.
pub struct ConnReader<R> {
    stream: R,
    max_packet_bytes: u32,
    read_deadline: Duration,
}

/// The write side of a framed connection. Cheap to clone; all writers share
/// the same underlying mutex so control messages and audio frames never
/// interleave on the wire.
#[derive(Clone)]
pub struct ConnWriter<W> {
    stream: Arc<Mutex<W>>,
}

/// Splits an already-connected, already-handshaken stream into its framed
/// read and write halves.
pub fn split<S>(
    stream: S,
    max_packet_bytes: u32,
    read_deadline: Duration,
) -> (ConnReader<ReadHalf<S>>, ConnWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (rd, wr) = tokio::io::split(stream);
    (
        ConnReader {
            stream: rd,
            max_packet_bytes,
            read_deadline,
        },
        ConnWriter {
            stream: Arc::new(Mutex::new(wr)),
        },
    )
}

impl<R: AsyncRead + Unpin> ConnReader<R> {
    /// Reads one packet: `(type, payload)`. A read deadline (2x the ping
    /// interval by default) is armed across the whole frame — header and
    /// body — so a peer that sends a header and then stalls mid-payload is
    /// treated the same as one that never sends a header at all, and the
    /// stall surfaces as a `Transport` error rather than hanging forever.
    pub async fn read_packet(&mut self) -> Result<(u16, Vec<u8>)> {
        match tokio::time::timeout(self.read_deadline, self.read_packet_inner()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ReadTimeout.into()),
        }
    }

    async fn read_packet_inner(&mut self) -> Result<(u16, Vec<u8>)> {
        let mut header = [0u8; 6];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(TransportError::Io)?;

        let packet_type = BigEndian::read_u16(&header[0..2]);
        let length = BigEndian::read_u32(&header[2..6]);

        if length > self.max_packet_bytes {
            return Err(TransportError::PacketTooLarge {
                len: length,
                max: self.max_packet_bytes,
            }
            .into());
        }

        let mut payload = vec![0u8; length as usize];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(TransportError::Io)?;

        Ok((packet_type, payload))
    }
}

impl<W: AsyncWrite + Unpin> ConnWriter<W> {
    pub async fn write_packet(&self, packet_type: u16, payload: &[u8]) -> Result<()> {
        let mut header = [0u8; 6];
        BigEndian::write_u16(&mut header[0..2], packet_type);
        BigEndian::write_u32(&mut header[2..6], payload.len() as u32);

        let mut stream = self.stream.lock().await;
        stream.write_all(&header).await.map_err(TransportError::Io)?;
        stream.write_all(payload).await.map_err(TransportError::Io)?;
        stream.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    /// Builds and emits one audio sub-frame under opcode 1, atomically with
    /// respect to every other transport write.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_audio(
        &self,
        format: u8,
        target: u8,
        sequence: u64,
        final_frame: bool,
        payload: Vec<u8>,
        position: Option<(f32, f32, f32)>,
    ) -> Result<()> {
        let frame = AudioFrame {
            format,
            target,
            sequence,
            final_frame,
            payload,
            position,
        };
        self.write_packet(1, &frame.encode()).await
    }
}
