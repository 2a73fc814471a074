//! In-memory bus for tests.
//!
//! `MockBus` tracks name ownership, object registrations, and emitted signals,
//! and routes calls addressed to a well-known name into the owning
//! connection's handler. Replies are captured by `MockReply`.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

use crate::bus;
use crate::bus::BusConnection;
use crate::bus::BusConnector;
use crate::bus::CallHandler;
use crate::bus::MethodCall;
use crate::bus::NameToken;
use crate::bus::ObjectToken;
use crate::bus::PendingCall;
use crate::bus::Reply;
use crate::error::BusError;
use crate::error::STANDARD_ERROR_NAMESPACE;
use crate::value;
use crate::value::Value;

/// A signal recorded by the mock bus.
#[derive(Clone, Debug, PartialEq)]
pub struct EmittedSignal {
    /// A well-known name owned by the emitting connection at emission time.
    pub sender: Option<String>,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<Value>,
}

struct Object {
    connection: u64,
    path: String,
    interfaces: Vec<String>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    names: HashMap<String, (u64, NameToken)>,
    objects: HashMap<u64, Object>,
    handlers: HashMap<u64, CallHandler>,
    signals: Vec<EmittedSignal>,
    closed: HashSet<u64>,
    rejected: HashSet<String>,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_open(&self, connection: u64) -> bus::Result<()> {
        if self.closed.contains(&connection) {
            return Err(bus::Error::Disconnected);
        }
        Ok(())
    }
}

/// A shared in-memory bus. Clones refer to the same bus.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Rc<RefCell<State>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later request for `name` fail with `Rejected`.
    pub fn reject_name(&self, name: &str) {
        self.state.borrow_mut().rejected.insert(name.to_string());
    }

    /// Currently owned well-known names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().names.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn owns(&self, name: &str) -> bool {
        self.state.borrow().names.contains_key(name)
    }

    /// Registered object paths, sorted, with their interfaces.
    pub fn objects(&self) -> Vec<(String, Vec<String>)> {
        let mut objects: Vec<_> = self
            .state
            .borrow()
            .objects
            .values()
            .map(|o| (o.path.clone(), o.interfaces.clone()))
            .collect();
        objects.sort();
        objects
    }

    pub fn signals(&self) -> Vec<EmittedSignal> {
        self.state.borrow().signals.clone()
    }

    pub fn take_signals(&self) -> Vec<EmittedSignal> {
        std::mem::take(&mut self.state.borrow_mut().signals)
    }

    pub fn closed_connections(&self) -> usize {
        self.state.borrow().closed.len()
    }

    /// Delivers a call to the connection owning `destination`.
    ///
    /// The reply may arrive immediately or later; inspect the returned `MockReply`.
    pub fn call(&self, destination: &str, call: MethodCall) -> MockReply {
        let (reply, pending) = MockReply::new();

        let handler = {
            let state = self.state.borrow();
            let Some(&(connection, _)) = state.names.get(destination) else {
                pending.reply_error(standard_error("ServiceUnknown", format!("'{}' is not owned", destination)));
                return reply;
            };
            let registered = state
                .objects
                .values()
                .any(|o| o.connection == connection && o.path == call.path);
            match state.handlers.get(&connection) {
                Some(handler) if registered => handler.clone(),
                _ => {
                    pending.reply_error(standard_error("UnknownObject", format!("no object at '{}'", call.path)));
                    return reply;
                }
            }
        };

        handler(call, pending);
        reply
    }
}

fn standard_error(category: &str, message: String) -> BusError {
    BusError::new(format!("{}.{}", STANDARD_ERROR_NAMESPACE, category), message)
}

impl BusConnector for MockBus {
    fn connect(&self) -> bus::Result<Rc<dyn BusConnection>> {
        let id = self.state.borrow_mut().next();
        Ok(Rc::new(MockConnection { id, bus: self.clone() }))
    }
}

/// One connection to a `MockBus`.
pub struct MockConnection {
    id: u64,
    bus: MockBus,
}

impl BusConnection for MockConnection {
    fn request_name(&self, name: &str) -> bus::Result<NameToken> {
        let mut state = self.bus.state.borrow_mut();
        state.check_open(self.id)?;
        if !value::is_valid_dotted_name(name, true) {
            return Err(bus::Error::Rejected(format!("'{}' is not a valid bus name", name)));
        }
        if state.rejected.contains(name) {
            return Err(bus::Error::Rejected(format!("name '{}' refused", name)));
        }
        if state.names.contains_key(name) {
            return Err(bus::Error::NameTaken(name.to_string()));
        }
        let token = NameToken(state.next());
        state.names.insert(name.to_string(), (self.id, token));
        Ok(token)
    }

    fn release_name(&self, token: NameToken) -> bus::Result<()> {
        let mut state = self.bus.state.borrow_mut();
        state.check_open(self.id)?;
        let before = state.names.len();
        state
            .names
            .retain(|_, (connection, owned)| !(*connection == self.id && *owned == token));
        if state.names.len() == before {
            return Err(bus::Error::UnknownToken(token.0));
        }
        Ok(())
    }

    fn register_object(&self, path: &str, interfaces: &[&str]) -> bus::Result<ObjectToken> {
        let mut state = self.bus.state.borrow_mut();
        state.check_open(self.id)?;
        if state
            .objects
            .values()
            .any(|o| o.connection == self.id && o.path == path)
        {
            return Err(bus::Error::Rejected(format!("object already registered at '{}'", path)));
        }
        let token = state.next();
        state.objects.insert(
            token,
            Object {
                connection: self.id,
                path: path.to_string(),
                interfaces: interfaces.iter().map(|i| i.to_string()).collect(),
            },
        );
        Ok(ObjectToken(token))
    }

    fn unregister_object(&self, token: ObjectToken) -> bus::Result<()> {
        let mut state = self.bus.state.borrow_mut();
        state.check_open(self.id)?;
        match state.objects.get(&token.0) {
            Some(object) if object.connection == self.id => {
                state.objects.remove(&token.0);
                Ok(())
            }
            _ => Err(bus::Error::UnknownToken(token.0)),
        }
    }

    fn serve(&self, handler: CallHandler) -> bus::Result<()> {
        let mut state = self.bus.state.borrow_mut();
        state.check_open(self.id)?;
        state.handlers.insert(self.id, handler);
        Ok(())
    }

    fn emit_signal(&self, path: &str, interface: &str, member: &str, args: Vec<Value>) -> bus::Result<()> {
        let mut state = self.bus.state.borrow_mut();
        state.check_open(self.id)?;
        let sender = state
            .names
            .iter()
            .filter(|(_, (connection, _))| *connection == self.id)
            .map(|(name, _)| name.clone())
            .min();
        state.signals.push(EmittedSignal {
            sender,
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        });
        Ok(())
    }

    fn close(&self) -> bus::Result<()> {
        // Dropped outside the borrow: the handler may own the last reference
        // to something that touches the bus when dropped.
        let handler = {
            let mut state = self.bus.state.borrow_mut();
            state.check_open(self.id)?;
            state.closed.insert(self.id);
            state.names.retain(|_, (connection, _)| *connection != self.id);
            state.objects.retain(|_, o| o.connection != self.id);
            state.handlers.remove(&self.id)
        };
        drop(handler);
        Ok(())
    }
}

/// Captures the reply to one call.
#[derive(Clone, Default)]
pub struct MockReply {
    slot: Rc<RefCell<Option<Reply>>>,
    count: Rc<Cell<usize>>,
}

impl MockReply {
    /// A capture slot and the `PendingCall` that fills it.
    pub fn new() -> (Self, PendingCall) {
        let reply = Self::default();
        let slot = reply.slot.clone();
        let count = reply.count.clone();
        let pending = PendingCall::new(move |r| {
            count.set(count.get() + 1);
            *slot.borrow_mut() = Some(r);
        });
        (reply, pending)
    }

    /// True until a reply arrives.
    pub fn is_pending(&self) -> bool {
        self.count.get() == 0
    }

    /// Number of replies delivered. Anything other than 0 or 1 is a bug.
    pub fn reply_count(&self) -> usize {
        self.count.get()
    }

    pub fn take(&self) -> Option<Reply> {
        self.slot.borrow_mut().take()
    }

    /// The reply values, if a successful reply arrived.
    pub fn values(&self) -> Option<Vec<Value>> {
        match self.slot.borrow().as_ref() {
            Some(Ok(values)) => Some(values.clone()),
            _ => None,
        }
    }

    /// The error reply, if one arrived.
    pub fn error(&self) -> Option<BusError> {
        match self.slot.borrow().as_ref() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }
}
