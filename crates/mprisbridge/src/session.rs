//! # Session Registry
//!
//! Maps session ids to live remote players and owns their bus resources.
//!
//! ## Lifecycle
//!
//! 1. **Create**: the first `changed` or `seeked` event for an unknown id opens a
//!    bus connection, claims a well-known name, builds the player, and
//!    registers its object.
//! 2. **Serve**: bus calls are not handled inside the bus callback. They are
//!    queued as `InboundCall`s and handed back through `handle_call` by the
//!    event loop, so the registry is never re-entered.
//! 3. **Remove**: `quit` (or shutdown) abandons pending reads, unregisters the
//!    object, releases the name, and closes the connection.
//!
//! ## Naming
//!
//! The first live session takes the configured base name. While another
//! session is live, a new one takes `<base>.instance<escaped id>`. An id whose
//! escaped form would not make a valid bus name (too long, mostly) gets
//! `<base>.session<n>` instead, with `n` counting up per registry.

use std::cell::Cell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use busobj::BusConnection;
use busobj::BusConnector;
use busobj::HandlerError;
use busobj::MethodCall;
use busobj::PendingCall;
use busobj::bus;
use busobj::bus::NameToken;
use busobj::bus::ObjectToken;
use busobj::value;

use crate::escape;
use crate::message::MessageKind;
use crate::message::PeerMessage;
use crate::message::SessionId;
use crate::proxy;
use crate::proxy::ERROR_NAMESPACE;
use crate::proxy::Outbox;
use crate::proxy::ProxySettings;
use crate::proxy::RemotePlayer;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Bus(bus::Error),
    Proxy(proxy::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus error: {}", e),
            Self::Proxy(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<bus::Error> for Error {
    fn from(e: bus::Error) -> Self {
        Self::Bus(e)
    }
}

impl From<proxy::Error> for Error {
    fn from(e: proxy::Error) -> Self {
        Self::Proxy(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bus call waiting to be routed to its session.
#[derive(Debug)]
pub struct InboundCall {
    pub session: SessionId,
    pub call: MethodCall,
    pub pending: PendingCall,
}

pub type CallReceiver = mpsc::UnboundedReceiver<InboundCall>;

struct Session {
    player: RemotePlayer,
    connection: Rc<dyn BusConnection>,
    bus_name: String,
    name: NameToken,
    object: ObjectToken,
}

impl Session {
    fn close(mut self) {
        let abandoned = self.player.abandon_fetches();
        if abandoned > 0 {
            warn!(session = %self.player.session(), abandoned, "pending Position reads abandoned");
        }
        if let Err(e) = self.connection.unregister_object(self.object) {
            warn!(session = %self.player.session(), error = %e, "unregister failed");
        }
        if let Err(e) = self.connection.release_name(self.name) {
            warn!(session = %self.player.session(), error = %e, "name release failed");
        }
        if let Err(e) = self.connection.close() {
            warn!(session = %self.player.session(), error = %e, "connection close failed");
        }
        info!(session = %self.player.session(), bus_name = %self.bus_name, "session torn down");
    }
}

/// Everything needed to open a session, kept apart from the session map.
struct SessionFactory {
    connector: Rc<dyn BusConnector>,
    outbox: Rc<dyn Outbox>,
    settings: ProxySettings,
    base_name: String,
    calls: mpsc::UnboundedSender<InboundCall>,
    fallback_seq: Cell<u64>,
}

impl SessionFactory {
    fn open(&self, id: &SessionId, live: usize) -> Result<Session> {
        let connection = self.connector.connect()?;
        match self.expose(id, live, &connection) {
            Ok(session) => Ok(session),
            Err(e) => {
                if let Err(close) = connection.close() {
                    debug!(session = %id, error = %close, "close after failed open");
                }
                Err(e)
            }
        }
    }

    fn expose(&self, id: &SessionId, live: usize, connection: &Rc<dyn BusConnection>) -> Result<Session> {
        let (bus_name, name) = self.claim_name(id, live, connection)?;
        let player = RemotePlayer::new(id.clone(), self.outbox.clone(), connection.clone(), &self.settings)?;
        let object = connection.register_object(&self.settings.object_path, &player.service().interface_names())?;

        let sender = self.calls.clone();
        let session = id.clone();
        connection.serve(Rc::new(move |call: MethodCall, pending: PendingCall| {
            let inbound = InboundCall { session: session.clone(), call, pending };
            if let Err(mpsc::error::SendError(dropped)) = sender.send(inbound) {
                let error = HandlerError::Failed("bridge is shutting down".into());
                dropped.pending.reply_error(error.into_bus_error(ERROR_NAMESPACE));
            }
        }))?;

        info!(session = %id, bus_name = %bus_name, "session created");
        Ok(Session { player, connection: connection.clone(), bus_name, name, object })
    }

    fn claim_name(&self, id: &SessionId, live: usize, connection: &Rc<dyn BusConnection>) -> Result<(String, NameToken)> {
        let instance = self.instance_name(id);
        if live == 0 {
            match connection.request_name(&self.base_name) {
                Ok(token) => return Ok((self.base_name.clone(), token)),
                Err(bus::Error::NameTaken(_)) => {
                    debug!(session = %id, name = %self.base_name, "base name taken, using instance name");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let token = connection.request_name(&instance)?;
        Ok((instance, token))
    }

    fn instance_name(&self, id: &SessionId) -> String {
        let instance = format!("{}.instance{}", self.base_name, escape::escape(&id.to_string()));
        if value::is_valid_dotted_name(&instance, true) {
            return instance;
        }
        let seq = self.fallback_seq.get() + 1;
        self.fallback_seq.set(seq);
        let fallback = format!("{}.session{}", self.base_name, seq);
        debug!(session = %id, name = %fallback, "escaped id is not a valid bus name");
        fallback
    }
}

/// Live sessions by id.
pub struct SessionRegistry {
    factory: SessionFactory,
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    /// Creates the registry and the queue its sessions' bus calls arrive on.
    pub fn new(
        connector: Rc<dyn BusConnector>,
        outbox: Rc<dyn Outbox>,
        settings: ProxySettings,
        base_name: &str,
    ) -> (Self, CallReceiver) {
        let (calls, receiver) = mpsc::unbounded_channel();
        let factory = SessionFactory {
            connector,
            outbox,
            settings,
            base_name: base_name.to_string(),
            calls,
            fallback_seq: Cell::new(0),
        };
        (Self { factory, sessions: HashMap::new() }, receiver)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// The well-known name a live session owns.
    pub fn bus_name(&self, id: &SessionId) -> Option<&str> {
        self.sessions.get(id).map(|s| s.bus_name.as_str())
    }

    pub fn player(&self, id: &SessionId) -> Option<&RemotePlayer> {
        self.sessions.get(id).map(|s| &s.player)
    }

    /// The player for `id`, exposing a new one if needed.
    pub fn get_or_create(&mut self, id: &SessionId) -> Result<&mut RemotePlayer> {
        let live = self.sessions.len();
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(entry) => Ok(&mut entry.into_mut().player),
            Entry::Vacant(entry) => {
                let session = self.factory.open(id, live)?;
                Ok(&mut entry.insert(session).player)
            }
        }
    }

    /// Tears a session down. Returns `false` if it did not exist.
    pub fn remove(&mut self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some(session) => {
                session.close();
                true
            }
            None => {
                debug!(session = %id, "remove for unknown session ignored");
                false
            }
        }
    }

    /// Routes one inbound peer message.
    pub fn handle_message(&mut self, message: PeerMessage) -> Result<()> {
        match message.kind {
            MessageKind::Quit => {
                self.remove(&message.session);
            }
            MessageKind::Changed | MessageKind::Seeked => {
                self.get_or_create(&message.session)?.handle_event(message);
            }
            MessageKind::Return => match self.sessions.get_mut(&message.session) {
                Some(session) => session.player.handle_event(message),
                None => warn!(session = %message.session, "return for unknown session dropped"),
            },
            MessageKind::Call | MessageKind::Unknown => {
                debug!(session = %message.session, kind = ?message.kind, "message ignored");
            }
        }
        Ok(())
    }

    /// Routes one queued bus call to its session.
    pub fn handle_call(&mut self, inbound: InboundCall) {
        let InboundCall { session, call, pending } = inbound;
        match self.sessions.get_mut(&session) {
            Some(live) => live.player.handle_call(call, pending),
            None => {
                debug!(session = %session, "call for a session that is gone");
                let error = HandlerError::UnknownObject(call.path);
                pending.reply_error(error.into_bus_error(ERROR_NAMESPACE));
            }
        }
    }

    /// Tears every session down. Returns how many there were.
    pub fn shutdown(&mut self) -> usize {
        let count = self.sessions.len();
        for (_, session) in self.sessions.drain() {
            session.close();
        }
        if count > 0 {
            info!(sessions = count, "all sessions torn down");
        }
        count
    }
}
