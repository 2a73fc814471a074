//! # MPRIS Bridge
//!
//! Presents remote media players, reachable only through length-prefixed JSON
//! frames, as MPRIS objects on the session bus.
//!
//! ## Data Flow
//!
//! - **Inbound frames**: `Host` decodes a frame, `SessionRegistry` routes it by
//!   session id, and the session's `RemotePlayer` updates its cache, emits
//!   signals, or resolves a deferred read.
//! - **Bus calls**: a session's `RemotePlayer` dispatches the call. Playback
//!   methods and property writes become outbound frames.
//!
//! ## Threading
//!
//! One thread, one event loop. Deferred replies park a continuation and
//! return; nothing blocks.

pub mod config;
pub mod escape;
pub mod host;
pub mod logging;
pub mod message;
pub mod mpris;
pub mod proxy;
pub mod session;


pub use config::BridgeConfig;
pub use host::Host;
pub use message::MessageKind;
pub use message::PeerMessage;
pub use message::SessionId;
pub use proxy::ChannelOutbox;
pub use proxy::Outbox;
pub use proxy::ProxySettings;
pub use proxy::RemotePlayer;
pub use session::InboundCall;
pub use session::SessionRegistry;
