//! Length-prefixed text framing over a byte stream
//!
//! Frame format for control traffic:
//! ```text
//! +----------------+------------------+
//! | length         | payload          |
//! | (4 bytes, BE)  | (UTF-8 text)     |
//! +----------------+------------------+
//! ```
//!
//! File payloads use a separate raw encoding on the same stream: an 8-byte
//! signed big-endian length followed by that many bytes. A length of -1 is
//! the "not found" sentinel for a failed download.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RelayError, Result};

/// Frame header size: 4-byte big-endian payload length
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum text frame payload size (8 MB)
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Encode a text frame into a new buffer.
pub fn encode_frame(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + text.len());
    buf.extend_from_slice(&(text.len() as u32).to_be_bytes());
    buf.extend_from_slice(text.as_bytes());
    buf.freeze()
}

/// Write one text frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<()> {
    writer.write_all(&encode_frame(text)).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a raw payload: 8-byte signed length followed by the bytes.
pub async fn write_blob<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    writer.write_i64(data.len() as i64).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Write the download "not found" sentinel.
pub async fn write_not_found<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_i64(-1).await?;
    writer.flush().await?;
    Ok(())
}

/// Buffered frame reader over one connection's read half.
///
/// The dispatcher is the only reader of a connection, so this also exposes
/// raw-byte reads for the file transfer path; bytes already pulled into the
/// frame buffer are drained before touching the underlying stream again.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader with the protocol-wide payload cap.
    pub fn new(inner: R) -> Self {
        Self::with_max(inner, MAX_FRAME_SIZE)
    }

    /// Create a frame reader with a configured payload cap. The cap never
    /// exceeds the protocol-wide maximum.
    pub fn with_max(inner: R, max_frame: usize) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(4096),
            max_frame: max_frame.min(MAX_FRAME_SIZE),
        }
    }

    /// Read the next text frame. Returns `None` on a clean end of stream;
    /// an end of stream in the middle of a frame is a protocol error.
    pub async fn read_frame(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(frame) = self.decode_buffered()? {
                return Ok(Some(frame));
            }

            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(RelayError::protocol("connection closed mid-frame"));
            }
        }
    }

    /// Try to decode one frame out of the buffer.
    fn decode_buffered(&mut self) -> Result<Option<String>> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let payload_len =
            u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;

        if payload_len > self.max_frame {
            return Err(RelayError::protocol(format!(
                "frame payload too large: {} bytes (max: {})",
                payload_len, self.max_frame
            )));
        }

        if self.buffer.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.buffer.split_to(payload_len);

        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|_| RelayError::protocol("frame payload is not valid UTF-8"))
    }

    /// Read the 8-byte signed length that precedes a raw file payload.
    pub async fn read_i64(&mut self) -> Result<i64> {
        while self.buffer.len() < 8 {
            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(RelayError::protocol("connection closed before file length"));
            }
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buffer[..8]);
        self.buffer.advance(8);
        Ok(i64::from_be_bytes(bytes))
    }

    /// Read up to `max` raw bytes, draining the frame buffer first.
    /// Returns an empty chunk at end of stream.
    pub async fn read_chunk(&mut self, max: usize) -> Result<Bytes> {
        if self.buffer.is_empty() {
            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Ok(Bytes::new());
            }
        }
        let take = max.min(self.buffer.len());
        Ok(self.buffer.split_to(take).freeze())
    }
}
