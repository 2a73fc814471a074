//! # Async Frames
//!
//! Both halves for event loops driven by tokio. Reading and writing suspend the
//! task, never the thread, so bus traffic keeps flowing while the peer is quiet
//! or slow to drain its input.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::DEFAULT_MAX_FRAME_LEN;
use crate::PREFIX_LEN;
use crate::error::Error;
use crate::error::Result;
use crate::frame::check_len;
use crate::frame::decode_payload;
use crate::frame::encode;

/// Reads frames from an async stream.
pub struct AsyncFrameReader<R> {
    inner: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> AsyncFrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, max_frame_len: DEFAULT_MAX_FRAME_LEN }
    }

    pub fn with_max_frame_len(inner: R, max_frame_len: usize) -> Self {
        Self { inner, max_frame_len }
    }

    /// Reads the next frame and parses it as `T`.
    ///
    /// Same failure modes as `FrameReader::read`.
    ///
    /// Not cancel-safe: dropping the future mid-frame desynchronizes the stream.
    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut prefix = [0u8; PREFIX_LEN];
        if self.read_full(&mut prefix).await? < PREFIX_LEN {
            return Err(Error::Eof);
        }
        let len = check_len(prefix, self.max_frame_len)?;

        let mut payload = vec![0u8; len];
        let read = self.read_full(&mut payload).await?;
        if read < len {
            return Err(Error::Truncated { expected: len, read });
        }
        decode_payload(&payload)
    }

    async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Writes frames to an async stream, flushing after each.
pub struct AsyncFrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> AsyncFrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encodes `message` and writes it as one frame.
    ///
    /// Returns the number of bytes written, prefix included.
    pub async fn write<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<usize> {
        let frame = encode(message)?;
        self.write_frame(&frame).await?;
        Ok(frame.len())
    }

    /// Writes a frame produced by `encode` and flushes.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
