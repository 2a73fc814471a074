//! # Blocking Frames
//!
//! Frame encoding plus reader and writer halves over `std::io` streams.

use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::DEFAULT_MAX_FRAME_LEN;
use crate::PREFIX_LEN;
use crate::error::Error;
use crate::error::Result;

/// Encodes a message into a complete frame (prefix and payload).
///
/// # Errors
/// Returns `Error::Serialize` when the message has no JSON representation
/// (for example a map with non-string keys).
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message).map_err(Error::Serialize)?;
    let len = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_ne_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a payload (without its prefix) into a message.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(payload).map_err(Error::InvalidUtf8)?;
    serde_json::from_str(text).map_err(Error::Parse)
}

/// Validates a declared payload length against a ceiling.
pub(crate) fn check_len(prefix: [u8; PREFIX_LEN], max: usize) -> Result<usize> {
    let len = u32::from_ne_bytes(prefix) as usize;
    if len > max {
        return Err(Error::FrameTooLarge { len, max });
    }
    Ok(len)
}

/// Writes one frame per message and flushes after each.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes `message` as one frame and flushes the stream.
    ///
    /// Returns the number of bytes written, prefix included. A message that
    /// cannot be serialized writes nothing and returns `Error::Serialize`.
    pub fn write<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<usize> {
        let frame = encode(message)?;
        self.inner.write_all(&frame)?;
        self.inner.flush()?;
        Ok(frame.len())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads frames from a blocking stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, max_frame_len: DEFAULT_MAX_FRAME_LEN }
    }

    pub fn with_max_frame_len(inner: R, max_frame_len: usize) -> Self {
        Self { inner, max_frame_len }
    }

    /// Reads the next frame and parses it as `T`.
    ///
    /// # Errors
    /// - `Error::Eof` if fewer than 4 bytes remain for the prefix.
    /// - `Error::Truncated` if the stream ends inside the payload.
    /// - `Error::InvalidUtf8` / `Error::Parse` for malformed payloads.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut prefix = [0u8; PREFIX_LEN];
        if read_full(&mut self.inner, &mut prefix)? < PREFIX_LEN {
            return Err(Error::Eof);
        }
        let len = check_len(prefix, self.max_frame_len)?;

        let mut payload = vec![0u8; len];
        let read = read_full(&mut self.inner, &mut payload)?;
        if read < len {
            return Err(Error::Truncated { expected: len, read });
        }
        decode_payload(&payload)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Fills `buf` until it is full or the stream ends. Returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}
