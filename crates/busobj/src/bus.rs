//! # Bus Boundary
//!
//! The minimal interface this crate needs from a bus connection: own a name,
//! register an object, emit a signal, and answer a pending call.
//!
//! ## Philosophy
//!
//! - **Value-Oriented**: the connection moves `Value`s; it knows nothing about
//!   descriptors, caches, or dispatch.
//! - **Single Thread**: connections are shared through `Rc` and driven from one
//!   event loop. Nothing here is `Send`.
//! - **Exactly Once**: a `PendingCall` is consumed by its reply, so a call can
//!   never be answered twice.

use std::rc::Rc;

use crate::error::BusError;
use crate::value::Value;

/// Errors raised by the bus connection itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Another connection already owns the requested name.
    NameTaken(String),
    /// The token does not refer to a live registration.
    UnknownToken(u64),
    /// The connection is closed.
    Disconnected,
    /// The bus refused the request.
    Rejected(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameTaken(name) => write!(f, "bus name '{}' is already owned", name),
            Self::UnknownToken(token) => write!(f, "no registration for token {}", token),
            Self::Disconnected => write!(f, "bus connection is closed"),
            Self::Rejected(msg) => write!(f, "bus rejected request: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Handle for an owned well-known name.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct NameToken(pub u64);

/// Handle for a registered object.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObjectToken(pub u64);

/// Descriptor handle as carried by a call.
pub type Fd = i32;

/// An inbound method call.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub path: String,
    /// The bus allows calls without an interface; the member is then looked up
    /// across every registered interface.
    pub interface: Option<String>,
    pub member: String,
    pub args: Vec<Value>,
    /// Descriptors that accompany the call. `h` arguments index into this table.
    pub fds: Vec<Fd>,
}

impl MethodCall {
    pub fn new(path: &str, interface: &str, member: &str, args: Vec<Value>) -> Self {
        Self {
            path: path.to_string(),
            interface: Some(interface.to_string()),
            member: member.to_string(),
            args,
            fds: Vec::new(),
        }
    }
}

/// The outcome delivered to a caller.
pub type Reply = std::result::Result<Vec<Value>, BusError>;

/// A call in flight, parked until a handler produces its result.
pub struct PendingCall {
    respond: Box<dyn FnOnce(Reply)>,
}

impl PendingCall {
    pub fn new(respond: impl FnOnce(Reply) + 'static) -> Self {
        Self { respond: Box::new(respond) }
    }

    pub fn reply(self, values: Vec<Value>) {
        (self.respond)(Ok(values))
    }

    pub fn reply_error(self, error: BusError) {
        (self.respond)(Err(error))
    }

    pub fn finish(self, reply: Reply) {
        (self.respond)(reply)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingCall")
    }
}

/// Receives the calls addressed to a connection's objects.
pub type CallHandler = Rc<dyn Fn(MethodCall, PendingCall)>;

/// One connection to the bus.
pub trait BusConnection {
    fn request_name(&self, name: &str) -> Result<NameToken>;

    fn release_name(&self, token: NameToken) -> Result<()>;

    /// Exposes an object implementing `interfaces` at `path`.
    fn register_object(&self, path: &str, interfaces: &[&str]) -> Result<ObjectToken>;

    fn unregister_object(&self, token: ObjectToken) -> Result<()>;

    /// Installs the receiver for inbound calls. Replaces any previous handler.
    fn serve(&self, handler: CallHandler) -> Result<()>;

    fn emit_signal(&self, path: &str, interface: &str, member: &str, args: Vec<Value>) -> Result<()>;

    /// Closes the connection. Further requests fail with `Error::Disconnected`.
    fn close(&self) -> Result<()>;
}

/// Opens connections. One connection per exposed service.
pub trait BusConnector {
    fn connect(&self) -> Result<Rc<dyn BusConnection>>;
}
