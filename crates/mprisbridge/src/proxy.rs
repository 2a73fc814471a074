//! # Remote Player Proxy
//!
//! Exposes one remote player as an MPRIS object and translates in both directions.
//!
//! ## Outbound
//!
//! - Playback methods and writable-property `Set`s are forwarded as `call`
//!   messages and acknowledged at once. Nothing waits for the peer.
//! - Reading `Position` sends a fetch tagged with a fresh id and defers the
//!   reply until the matching `return` arrives.
//!
//! ## Inbound
//!
//! - `changed`: values are typed per the descriptors, cached, and announced
//!   with one `PropertiesChanged` per affected interface.
//! - `seeked`: re-emitted as the `Seeked` signal.
//! - `return`: resolves a deferred `Position` read.
//! - Anything else is ignored.
//!
//! Track ids double as object-path segments, so they are escaped on the way
//! in and unescaped on the way out.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use serde_json::Value as Json;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use busobj::BusConnection;
use busobj::DispatchTable;
use busobj::FetchId;
use busobj::HandlerError;
use busobj::HandlerResult;
use busobj::MethodCall;
use busobj::PendingCall;
use busobj::Service;
use busobj::ServiceContext;
use busobj::Value;
use busobj::descriptor;
use busobj::dispatch;
use busobj::value;
use jsonframe::FrameWriter;

use crate::escape;
use crate::message::MessageKind;
use crate::message::PeerMessage;
use crate::message::SessionId;
use crate::mpris;
use crate::mpris::PLAYER_INTERFACE;
use crate::mpris::ROOT_INTERFACE;

/// Namespace of error replies produced by the bridge itself.
pub const ERROR_NAMESPACE: &str = "org.mpris.MediaPlayer2.Bridge.Error";

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Descriptor(descriptor::Error),
    Service(dispatch::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Descriptor(e) => write!(f, "descriptor error: {}", e),
            Self::Service(e) => write!(f, "service error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<descriptor::Error> for Error {
    fn from(e: descriptor::Error) -> Self {
        Self::Descriptor(e)
    }
}

impl From<dispatch::Error> for Error {
    fn from(e: dispatch::Error) -> Self {
        Self::Service(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  OUTBOX
// ============================================================================

/// Where outbound peer messages go.
pub trait Outbox {
    /// Writes one message. Returns the number of bytes written.
    fn send(&self, message: &PeerMessage) -> jsonframe::Result<usize>;
}

impl<W: Write> Outbox for RefCell<FrameWriter<W>> {
    fn send(&self, message: &PeerMessage) -> jsonframe::Result<usize> {
        self.borrow_mut().write(message)
    }
}

/// Encodes on the caller's side and queues the frame for a writer task.
///
/// `send` never waits on the peer. Once closed, or once the receiving end is
/// gone, every send fails with `BrokenPipe`.
pub struct ChannelOutbox {
    frames: RefCell<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ChannelOutbox {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (frames, receiver) = mpsc::unbounded_channel();
        (Self { frames: RefCell::new(Some(frames)) }, receiver)
    }

    /// Stops accepting frames. The receiver sees the end of the queue after
    /// draining what was already sent.
    pub fn close(&self) {
        self.frames.borrow_mut().take();
    }
}

impl Outbox for ChannelOutbox {
    fn send(&self, message: &PeerMessage) -> jsonframe::Result<usize> {
        let frame = jsonframe::encode(message)?;
        let len = frame.len();
        let queued = match self.frames.borrow().as_ref() {
            Some(frames) => frames.send(frame).is_ok(),
            None => false,
        };
        if !queued {
            let closed = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer writer stopped");
            return Err(jsonframe::Error::Io(closed));
        }
        Ok(len)
    }
}

// ============================================================================
//  SETTINGS
// ============================================================================

/// Per-object settings shared by every session.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxySettings {
    pub object_path: String,
    pub track_path_prefix: String,
    pub identity: String,
    pub desktop_entry: Option<String>,
}

/// The object path standing for remote track `id`.
pub fn track_path(prefix: &str, id: &str) -> String {
    if id.is_empty() {
        return mpris::NO_TRACK.to_string();
    }
    format!("{}/{}", prefix, escape::escape(id))
}

/// The remote track id behind `path`, or `None` if `path` is not a track path.
pub fn track_id(prefix: &str, path: &str) -> Option<String> {
    let segment = path.strip_prefix(prefix)?.strip_prefix('/')?;
    if segment.is_empty() || segment.contains('/') {
        return None;
    }
    escape::unescape(segment).ok()
}

// ============================================================================
//  HANDLER
// ============================================================================

/// Handler state: who to forward to, and how track paths are built.
pub struct PlayerProxy {
    session: SessionId,
    outbox: Rc<dyn Outbox>,
    track_path_prefix: String,
}

impl PlayerProxy {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    fn send(&self, message: &PeerMessage) -> HandlerResult<()> {
        match self.outbox.send(message) {
            Ok(written) => {
                debug!(session = %self.session, method = ?message.method, bytes = written, "sent to peer");
                Ok(())
            }
            Err(e) => {
                warn!(session = %self.session, method = ?message.method, error = %e, "outbound message not sent");
                Err(HandlerError::Failed(format!("could not reach the player: {}", e)))
            }
        }
    }

    /// Forwards a call to the remote player.
    fn forward(&self, method: &str, args: &[Value]) -> HandlerResult<()> {
        let args = args
            .iter()
            .map(Value::to_json)
            .collect::<value::Result<Vec<_>>>()
            .map_err(|e| {
                warn!(session = %self.session, method, error = %e, "arguments not representable, call dropped");
                HandlerError::Failed(e.to_string())
            })?;
        self.send(&PeerMessage::call(self.session.clone(), method, args))
    }
}

macro_rules! forward_methods {
    ($($handler:ident => $method:literal),* $(,)?) => {
        $(
            fn $handler(
                proxy: &mut PlayerProxy,
                _ctx: &mut ServiceContext,
                args: Vec<Value>,
            ) -> HandlerResult<Vec<Value>> {
                proxy.forward($method, &args)?;
                Ok(Vec::new())
            }
        )*
    };
}

macro_rules! forward_properties {
    ($($handler:ident => $property:literal),* $(,)?) => {
        $(
            fn $handler(proxy: &mut PlayerProxy, _ctx: &mut ServiceContext, value: Value) -> HandlerResult<()> {
                proxy.forward($property, &[value])
            }
        )*
    };
}

forward_methods! {
    raise => "Raise",
    quit => "Quit",
    next => "Next",
    previous => "Previous",
    pause => "Pause",
    play_pause => "PlayPause",
    stop => "Stop",
    play => "Play",
    seek => "Seek",
    open_uri => "OpenUri",
}

forward_properties! {
    set_loop_status => "LoopStatus",
    set_rate => "Rate",
    set_shuffle => "Shuffle",
    set_volume => "Volume",
}

fn set_position(proxy: &mut PlayerProxy, _ctx: &mut ServiceContext, args: Vec<Value>) -> HandlerResult<Vec<Value>> {
    let (path, position) = match args.as_slice() {
        [Value::ObjectPath(path), Value::Int64(position)] => (path.as_str(), *position),
        _ => return Err(HandlerError::InvalidArgs("SetPosition expects (ox)".into())),
    };
    if path == mpris::NO_TRACK {
        debug!(session = %proxy.session, "SetPosition on no track ignored");
        return Ok(Vec::new());
    }

    let id = track_id(&proxy.track_path_prefix, path)
        .ok_or_else(|| HandlerError::InvalidArgs(format!("'{}' is not a track of this player", path)))?;
    proxy.forward("SetPosition", &[Value::str(id), Value::Int64(position)])?;
    Ok(Vec::new())
}

fn fetch_position(proxy: &mut PlayerProxy, _ctx: &mut ServiceContext, id: FetchId) -> HandlerResult<()> {
    proxy.send(&PeerMessage::fetch(proxy.session.clone(), "Position", id.0))
}

fn dispatch_table() -> DispatchTable<PlayerProxy> {
    DispatchTable::new()
        .method(ROOT_INTERFACE, "Raise", raise)
        .method(ROOT_INTERFACE, "Quit", quit)
        .method(PLAYER_INTERFACE, "Next", next)
        .method(PLAYER_INTERFACE, "Previous", previous)
        .method(PLAYER_INTERFACE, "Pause", pause)
        .method(PLAYER_INTERFACE, "PlayPause", play_pause)
        .method(PLAYER_INTERFACE, "Stop", stop)
        .method(PLAYER_INTERFACE, "Play", play)
        .method(PLAYER_INTERFACE, "Seek", seek)
        .method(PLAYER_INTERFACE, "SetPosition", set_position)
        .method(PLAYER_INTERFACE, "OpenUri", open_uri)
        .setter(PLAYER_INTERFACE, "LoopStatus", set_loop_status)
        .setter(PLAYER_INTERFACE, "Rate", set_rate)
        .setter(PLAYER_INTERFACE, "Shuffle", set_shuffle)
        .setter(PLAYER_INTERFACE, "Volume", set_volume)
        .remote(PLAYER_INTERFACE, "Position", fetch_position)
}

// ============================================================================
//  REMOTE PLAYER
// ============================================================================

/// One exposed remote player.
pub struct RemotePlayer {
    service: Service<PlayerProxy>,
}

impl RemotePlayer {
    pub fn new(
        session: SessionId,
        outbox: Rc<dyn Outbox>,
        bus: Rc<dyn BusConnection>,
        settings: &ProxySettings,
    ) -> Result<Self> {
        let proxy = PlayerProxy {
            session,
            outbox,
            track_path_prefix: settings.track_path_prefix.clone(),
        };
        let mut service = Service::new(
            &settings.object_path,
            mpris::descriptors()?,
            dispatch_table(),
            proxy,
            bus,
        )?
        .with_error_namespace(ERROR_NAMESPACE);

        let cache = service.context_mut().cache_mut();
        for (property, value) in mpris::initial_properties(&settings.identity, settings.desktop_entry.as_deref()) {
            cache.insert(property, value);
        }
        Ok(Self { service })
    }

    pub fn session(&self) -> &SessionId {
        self.service.handler().session()
    }

    pub fn service(&self) -> &Service<PlayerProxy> {
        &self.service
    }

    pub fn handle_call(&mut self, call: MethodCall, pending: PendingCall) {
        self.service.handle_call(call, pending);
    }

    /// Drops every deferred `Position` read. Returns how many were waiting.
    pub fn abandon_fetches(&mut self) -> usize {
        self.service.abandon_fetches()
    }

    /// Applies one inbound peer message.
    pub fn handle_event(&mut self, message: PeerMessage) {
        match message.kind {
            MessageKind::Changed => match message.args.first() {
                Some(Json::Object(batch)) => self.apply_changes(batch),
                _ => warn!(session = %self.session(), "changed event without a property object"),
            },
            MessageKind::Seeked => self.seeked(message.args.first()),
            MessageKind::Return => self.resolve(message),
            MessageKind::Call | MessageKind::Quit | MessageKind::Unknown => {
                debug!(session = %self.session(), kind = ?message.kind, "event ignored");
            }
        }
    }

    fn seeked(&mut self, offset: Option<&Json>) {
        let Some(offset) = offset.and_then(json_i64) else {
            warn!(session = %self.session(), "seeked event without an offset");
            return;
        };
        if let Err(e) = self
            .service
            .context()
            .emit_signal(PLAYER_INTERFACE, "Seeked", vec![Value::Int64(offset)])
        {
            warn!(session = %self.session(), error = %e, "Seeked not emitted");
        }
    }

    fn resolve(&mut self, message: PeerMessage) {
        let property = message.method.as_deref().unwrap_or("Position");
        let id = message.id.map(FetchId);
        let settled = match self.return_value(property, message.args.first()) {
            Ok(value) => self.service.resolve_fetch(property, id, value),
            Err(e) => {
                warn!(session = %self.session(), property, id = ?id, error = %e, "unusable return answers its read with an error");
                self.service.fail_fetch(property, id, e)
            }
        };
        if !settled {
            warn!(session = %self.session(), property, id = ?id, "return matched no pending read");
        }
    }

    /// Types the value carried by a `return` event.
    fn return_value(&self, property: &str, raw: Option<&Json>) -> HandlerResult<Value> {
        let raw = raw.ok_or_else(|| HandlerError::Failed(format!("the player returned no value for '{}'", property)))?;
        let signature = match self.service.context().find_property(property) {
            Some((_, spec)) => spec.signature.clone(),
            None => return Err(HandlerError::Failed(format!("'{}' is not a property of this player", property))),
        };
        Value::from_json(&integral(raw, &signature), &signature)
            .map_err(|e| HandlerError::Failed(format!("the player returned an unusable '{}': {}", property, e)))
    }

    fn apply_changes(&mut self, batch: &serde_json::Map<String, Json>) {
        let prefix = self.service.handler().track_path_prefix.clone();
        let mut changed = Vec::new();

        for (name, raw) in batch {
            if mpris::REMOTE_PROPERTIES.contains(&name.as_str()) {
                debug!(property = %name, "remote property in change batch ignored");
                continue;
            }
            let signature = match self.service.context().find_property(name) {
                Some((_, spec)) => spec.signature.clone(),
                None => {
                    debug!(property = %name, "undeclared property in change batch dropped");
                    continue;
                }
            };

            let value = if name == "Metadata" {
                metadata(raw, &prefix)
            } else {
                Value::from_json(raw, &signature)
            };
            match value {
                Ok(value) => {
                    self.service.context_mut().cache_mut().insert(name.clone(), value);
                    changed.push(name.as_str());
                }
                Err(e) => warn!(property = %name, error = %e, "property change dropped"),
            }
        }

        match self.service.context().notify_changed(&changed, &[]) {
            Ok(signals) => debug!(session = %self.session(), properties = changed.len(), signals, "changes applied"),
            Err(e) => warn!(session = %self.session(), error = %e, "PropertiesChanged not emitted"),
        }
    }
}

impl Drop for RemotePlayer {
    fn drop(&mut self) {
        let pending = self.service.context().pending_fetches();
        if pending > 0 {
            info!(session = %self.session(), pending, "player dropped with unanswered Position reads");
        }
    }
}

/// Types a metadata object through the key table. Unknown keys and nulls are
/// dropped; the track id becomes an object path.
pub(crate) fn metadata(raw: &Json, prefix: &str) -> value::Result<Value> {
    let Json::Object(map) = raw else {
        return Err(value::Error::TypeMismatch {
            expected: "a{sv}".into(),
            found: "a non-object".into(),
        });
    };

    let mut entries = Vec::new();
    for (key, raw) in map {
        if raw.is_null() {
            continue;
        }
        let Some(signature) = mpris::metadata_signature(key) else {
            debug!(key = %key, "metadata key outside the type table dropped");
            continue;
        };
        let raw = if key == mpris::TRACK_ID_KEY {
            match raw {
                Json::String(id) => Json::String(track_path(prefix, id)),
                Json::Number(id) => Json::String(track_path(prefix, &id.to_string())),
                _ => {
                    debug!("non-scalar track id dropped");
                    continue;
                }
            }
        } else {
            integral(raw, &signature)
        };
        match Value::from_json(&raw, &signature) {
            Ok(value) => entries.push((key.clone(), value)),
            Err(e) => debug!(key = %key, error = %e, "metadata entry dropped"),
        }
    }
    Ok(Value::dict_sv(entries))
}

/// Browsers report durations and positions as fractional numbers; integer
/// types take the truncated value.
fn integral(raw: &Json, signature: &value::Signature) -> Json {
    let integer = b"ynqiuxt".contains(&signature.code()) && signature.is_basic();
    match raw.as_f64() {
        Some(f) if integer && f.is_finite() && f.fract() != 0.0 => Json::from(f.trunc()),
        _ => raw.clone(),
    }
}

fn json_i64(raw: &Json) -> Option<i64> {
    raw.as_i64().or_else(|| {
        raw.as_f64()
            .filter(|f| f.is_finite() && f.abs() < 9.2e18)
            .map(|f| f.trunc() as i64)
    })
}
