//! # Error Definitions
//!
//! Every failure of the frame codec. Read-side errors are fatal for the stream.

/// Frame codec failures.
#[derive(Debug)]
pub enum Error {
    /// The stream ended before a full length prefix was read.
    Eof,
    /// The stream ended in the middle of a payload.
    Truncated { expected: usize, read: usize },
    /// The declared payload length exceeds the reader's ceiling.
    FrameTooLarge { len: usize, max: usize },
    /// The payload is not valid UTF-8.
    InvalidUtf8(std::str::Utf8Error),
    /// The payload is not valid JSON for the requested message type.
    Parse(serde_json::Error),
    /// The outbound message cannot be represented as JSON. Nothing was written.
    Serialize(serde_json::Error),
    /// The underlying stream failed.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eof => write!(f, "end of stream while reading length prefix"),
            Self::Truncated { expected, read } => {
                write!(f, "truncated frame: expected {} payload bytes, read {}", expected, read)
            }
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds limit of {} bytes", len, max)
            }
            Self::InvalidUtf8(e) => write!(f, "payload is not UTF-8: {}", e),
            Self::Parse(e) => write!(f, "malformed payload: {}", e),
            Self::Serialize(e) => write!(f, "message is not representable as JSON: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidUtf8(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Serialize(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl Error {
    /// True when the stream closed cleanly on a frame boundary.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }
}

/// A specialized Result type for frame operations.
pub type Result<T> = std::result::Result<T, Error>;
