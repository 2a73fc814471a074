//! # JsonFrame
//!
//! Length-prefixed JSON messages over a pair of byte streams.
//!
//! ## Format
//!
//! - **Frame**: `[Len: 4b][Payload: Len]`
//! - **Len**: unsigned 32-bit payload length in native byte order.
//! - **Payload**: UTF-8 JSON text, one message per frame, no separators.
//!
//! ## Invariants
//!
//! - **No Resynchronization**: a length prefix that disagrees with its payload
//!   desynchronizes the stream for good. Every decode failure is fatal for the stream.
//! - **Flush Per Frame**: writers flush after every frame so the consumer never
//!   observes buffered delay.

mod error;
mod frame;
mod stream;


pub use error::Error;
pub use error::Result;
pub use frame::FrameReader;
pub use frame::FrameWriter;
pub use frame::decode_payload;
pub use frame::encode;
pub use stream::AsyncFrameReader;
pub use stream::AsyncFrameWriter;

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 4;

/// Default ceiling for inbound payloads.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;
