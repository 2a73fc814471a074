//! # Peer Messages
//!
//! The JSON objects carried in each frame of the peer channel.
//!
//! ## Schema
//!
//! `{"type": "call"|"return"|"changed"|"seeked"|"quit", "tabId": K, "method": M, "args": [...], "id": N}`
//!
//! - `tabId` is also accepted as `sessionId`, and may be a number or a string.
//! - `method` is present on `call` and `return`.
//! - `id` correlates a property fetch with its `return`. Peers that do not echo
//!   it are matched in arrival order.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as Json;

/// Opaque identifier of one remote player.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{}", id),
            Self::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Outbound: invoke a method on the remote player. Inbound: ignored.
    Call,
    /// The answer to a property fetch.
    Return,
    /// A batch of property changes, `args[0]` being an object of name to value.
    Changed,
    /// The player jumped; `args[0]` is the new position in microseconds.
    Seeked,
    /// The remote player is gone.
    Quit,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "tabId", alias = "sessionId")]
    pub session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub args: Vec<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl PeerMessage {
    /// A fire-and-forget method call for the remote player.
    pub fn call(session: SessionId, method: &str, args: Vec<Json>) -> Self {
        Self {
            kind: MessageKind::Call,
            session,
            method: Some(method.to_string()),
            args,
            id: None,
        }
    }

    /// A request for the current value of `property`, answered by a `return`
    /// carrying the same `id`.
    pub fn fetch(session: SessionId, property: &str, id: u64) -> Self {
        Self {
            kind: MessageKind::Call,
            session,
            method: Some(property.to_string()),
            args: Vec::new(),
            id: Some(id),
        }
    }

    /// Decodes one frame's JSON payload.
    pub fn from_json(json: Json) -> serde_json::Result<Self> {
        serde_json::from_value(json)
    }
}
