//! # Service Dispatcher
//!
//! Turns a set of interface descriptors and a handler object into a callable
//! bus object.
//!
//! ## Architecture
//!
//! - **DispatchTable**: an explicit table from `(interface, member)` to a typed
//!   handler function, built once per service type.
//! - **Service**: owns the handler, its table, and a `ServiceContext` (object
//!   path, property cache, pending fetches, bus connection). Routes each call.
//! - **Property Protocol**: `Get`, `GetAll`, and `Set` are answered here, reading
//!   the cache, a getter, or parking a deferred reply in the `Resolver`.
//!
//! ## Invariants
//! - Every declared method has a handler, and every handler names a declared
//!   member. `Service::new` refuses anything else.
//! - Every `PendingCall` is answered exactly once, unless it is parked behind a
//!   fetch that never completes.
//! - A handler failure, including a panic, becomes an error reply and never
//!   escapes `handle_call`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::bus::BusConnection;
use crate::bus::Fd;
use crate::bus::MethodCall;
use crate::bus::PendingCall;
use crate::cache::PropertyCache;
use crate::descriptor::Arg;
use crate::descriptor::InterfaceDescriptor;
use crate::descriptor::PropertySpec;
use crate::error::BusError;
use crate::error::DEFAULT_ERROR_NAMESPACE;
use crate::error::HandlerError;
use crate::error::HandlerResult;
use crate::introspect;
use crate::introspect::INTROSPECTABLE_INTERFACE;
use crate::introspect::PEER_INTERFACE;
use crate::introspect::PROPERTIES_INTERFACE;
use crate::resolver::FetchId;
use crate::resolver::FetchOutcome;
use crate::resolver::Resolver;
use crate::value;
use crate::value::Value;

/// Errors raised while assembling a service.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidPath(String),
    DuplicateInterface(String),
    /// A descriptor reuses the name of a meta-interface the dispatcher answers itself.
    ReservedInterface(String),
    /// A declared method has no handler function.
    MissingHandler { interface: String, method: String },
    /// The table references a member no descriptor declares.
    UndeclaredMember { interface: String, member: String },
    /// A getter or remote source is attached to a property that cannot be read.
    NotReadable { interface: String, property: String },
    /// A setter is attached to a property that cannot be written.
    NotWritable { interface: String, property: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "invalid object path '{}'", path),
            Self::DuplicateInterface(name) => write!(f, "interface '{}' registered twice", name),
            Self::ReservedInterface(name) => write!(f, "interface '{}' is reserved", name),
            Self::MissingHandler { interface, method } => {
                write!(f, "no handler for '{}.{}'", interface, method)
            }
            Self::UndeclaredMember { interface, member } => {
                write!(f, "handler for undeclared member '{}.{}'", interface, member)
            }
            Self::NotReadable { interface, property } => {
                write!(f, "'{}.{}' is not readable", interface, property)
            }
            Self::NotWritable { interface, property } => {
                write!(f, "'{}.{}' is not writable", interface, property)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  DISPATCH TABLE
// ============================================================================

/// Handles a declared method. Receives the unpacked arguments, returns the
/// declared outputs in order.
pub type MethodFn<H> = fn(&mut H, &mut ServiceContext, Vec<Value>) -> HandlerResult<Vec<Value>>;

/// Computes a property value synchronously.
pub type GetterFn<H> = fn(&H, &ServiceContext) -> HandlerResult<Value>;

/// Starts a remote fetch for a property. The value arrives later through
/// `Service::resolve_fetch` (or a failure through `Service::fail_fetch`) with the same id.
pub type FetchFn<H> = fn(&mut H, &mut ServiceContext, FetchId) -> HandlerResult<()>;

/// Applies a property write.
pub type SetterFn<H> = fn(&mut H, &mut ServiceContext, Value) -> HandlerResult<()>;

/// Where a readable property's value comes from.
pub enum PropertySource<H> {
    /// The property cache (the default).
    Cache,
    Getter(GetterFn<H>),
    /// The remote peer; reads are deferred.
    Remote(FetchFn<H>),
}

impl<H> Clone for PropertySource<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for PropertySource<H> {}

type Table<F> = HashMap<String, HashMap<String, F>>;

fn table_get<F: Copy>(table: &Table<F>, interface: &str, member: &str) -> Option<F> {
    table.get(interface).and_then(|members| members.get(member)).copied()
}

fn table_insert<F>(table: &mut Table<F>, interface: &str, member: &str, f: F) {
    table
        .entry(interface.to_string())
        .or_default()
        .insert(member.to_string(), f);
}

/// Name-to-function routing for one service type.
pub struct DispatchTable<H> {
    methods: Table<MethodFn<H>>,
    sources: Table<PropertySource<H>>,
    setters: Table<SetterFn<H>>,
}

impl<H> Default for DispatchTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> DispatchTable<H> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            sources: HashMap::new(),
            setters: HashMap::new(),
        }
    }

    pub fn method(mut self, interface: &str, name: &str, f: MethodFn<H>) -> Self {
        table_insert(&mut self.methods, interface, name, f);
        self
    }

    pub fn getter(mut self, interface: &str, property: &str, f: GetterFn<H>) -> Self {
        table_insert(&mut self.sources, interface, property, PropertySource::Getter(f));
        self
    }

    pub fn remote(mut self, interface: &str, property: &str, f: FetchFn<H>) -> Self {
        table_insert(&mut self.sources, interface, property, PropertySource::Remote(f));
        self
    }

    pub fn setter(mut self, interface: &str, property: &str, f: SetterFn<H>) -> Self {
        table_insert(&mut self.setters, interface, property, f);
        self
    }

    fn method_fn(&self, interface: &str, name: &str) -> Option<MethodFn<H>> {
        table_get(&self.methods, interface, name)
    }

    fn source(&self, interface: &str, property: &str) -> PropertySource<H> {
        table_get(&self.sources, interface, property).unwrap_or(PropertySource::Cache)
    }

    fn setter_fn(&self, interface: &str, property: &str) -> Option<SetterFn<H>> {
        table_get(&self.setters, interface, property)
    }

    /// Checks the table against the descriptors in both directions.
    fn validate(&self, interfaces: &[InterfaceDescriptor]) -> Result<()> {
        for descriptor in interfaces {
            for method in descriptor.methods() {
                if self.method_fn(descriptor.name(), &method.name).is_none() {
                    return Err(Error::MissingHandler {
                        interface: descriptor.name().to_string(),
                        method: method.name.clone(),
                    });
                }
            }
        }

        let find = |interface: &str| interfaces.iter().find(|d| d.name() == interface);
        let undeclared = |interface: &str, member: &str| Error::UndeclaredMember {
            interface: interface.to_string(),
            member: member.to_string(),
        };

        for (interface, members) in &self.methods {
            for name in members.keys() {
                find(interface)
                    .and_then(|d| d.method(name))
                    .ok_or_else(|| undeclared(interface, name))?;
            }
        }
        for (interface, members) in &self.sources {
            for name in members.keys() {
                let spec = find(interface)
                    .and_then(|d| d.property(name))
                    .ok_or_else(|| undeclared(interface, name))?;
                if !spec.access.readable() {
                    return Err(Error::NotReadable {
                        interface: interface.clone(),
                        property: name.clone(),
                    });
                }
            }
        }
        for (interface, members) in &self.setters {
            for name in members.keys() {
                let spec = find(interface)
                    .and_then(|d| d.property(name))
                    .ok_or_else(|| undeclared(interface, name))?;
                if !spec.access.writable() {
                    return Err(Error::NotWritable {
                        interface: interface.clone(),
                        property: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
//  SERVICE CONTEXT
// ============================================================================

/// Per-object state shared with handler functions.
pub struct ServiceContext {
    path: String,
    interfaces: Rc<[InterfaceDescriptor]>,
    bus: Rc<dyn BusConnection>,
    cache: PropertyCache,
    resolver: Resolver,
    error_namespace: String,
}

impl ServiceContext {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn interfaces(&self) -> &[InterfaceDescriptor] {
        &self.interfaces
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceDescriptor> {
        self.interfaces.iter().find(|d| d.name() == name)
    }

    /// The first interface declaring `property`, with its declaration.
    pub fn find_property(&self, property: &str) -> Option<(&InterfaceDescriptor, &PropertySpec)> {
        self.interfaces
            .iter()
            .find_map(|d| d.property(property).map(|spec| (d, spec)))
    }

    pub fn cache(&self) -> &PropertyCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PropertyCache {
        &mut self.cache
    }

    pub fn bus(&self) -> &Rc<dyn BusConnection> {
        &self.bus
    }

    pub fn error_namespace(&self) -> &str {
        &self.error_namespace
    }

    /// Number of deferred reads still waiting for a value.
    pub fn pending_fetches(&self) -> usize {
        self.resolver.total_pending()
    }

    /// Emits a declared signal after checking its arguments against the declaration.
    pub fn emit_signal(&self, interface: &str, member: &str, args: Vec<Value>) -> HandlerResult<()> {
        let spec = self
            .interface(interface)
            .ok_or_else(|| HandlerError::UnknownInterface(interface.to_string()))?
            .signal(member)
            .ok_or_else(|| HandlerError::Failed(format!("signal '{}.{}' is not declared", interface, member)))?;

        if spec.args.len() != args.len()
            || spec.args.iter().zip(&args).any(|(decl, arg)| decl.signature != arg.signature())
        {
            return Err(HandlerError::Failed(format!(
                "arguments of signal '{}.{}' do not match its declaration",
                interface, member
            )));
        }

        self.bus
            .emit_signal(&self.path, interface, member, args)
            .map_err(|e| HandlerError::Failed(e.to_string()))
    }

    /// Emits one `PropertiesChanged` signal per interface touched by `changed`
    /// or `invalidated`, carrying only that interface's subset.
    ///
    /// Changed values are read from the cache. Returns the number of signals emitted.
    pub fn notify_changed(&self, changed: &[&str], invalidated: &[&str]) -> HandlerResult<usize> {
        for name in changed.iter().chain(invalidated) {
            if self.find_property(name).is_none() {
                warn!(path = %self.path, property = %name, "change notification for undeclared property");
            }
        }

        let mut emitted = 0;
        for descriptor in self.interfaces.iter() {
            let mut entries = Vec::new();
            for name in changed {
                let Some(spec) = descriptor.property(name) else { continue };
                match self.cache.get(name) {
                    Some(value) if value.signature() == spec.signature => {
                        entries.push((name.to_string(), value.clone()));
                    }
                    Some(value) => {
                        warn!(
                            property = %name,
                            declared = %spec.signature,
                            actual = %value.signature(),
                            "cached value does not match declared type, not announced"
                        );
                    }
                    None => warn!(property = %name, "no cached value to announce"),
                }
            }
            let invalid: Vec<&str> = invalidated
                .iter()
                .copied()
                .filter(|name| descriptor.property(name).is_some())
                .collect();

            if entries.is_empty() && invalid.is_empty() {
                continue;
            }

            let args = vec![
                Value::str(descriptor.name()),
                Value::dict_sv(entries),
                Value::string_array(invalid),
            ];
            self.bus
                .emit_signal(&self.path, PROPERTIES_INTERFACE, "PropertiesChanged", args)
                .map_err(|e| HandlerError::Failed(e.to_string()))?;
            emitted += 1;
        }
        Ok(emitted)
    }
}

// ============================================================================
//  SERVICE
// ============================================================================

enum Outcome {
    Reply(Vec<Value>),
    Deferred,
}

enum Read<H> {
    Ready(Value),
    Remote(FetchFn<H>),
}

/// A `GetAll` reply waiting for its remote properties.
struct DeferredGetAll {
    pending: Option<PendingCall>,
    entries: Vec<(String, Value)>,
    outstanding: usize,
}

impl DeferredGetAll {
    fn settle(state: &Rc<RefCell<Self>>, property: String, outcome: FetchOutcome) {
        match outcome {
            Ok(value) => Self::fill(state, property, value),
            Err(error) => Self::fail(state, error),
        }
    }

    fn fill(state: &Rc<RefCell<Self>>, property: String, value: Value) {
        let ready = {
            let mut state = state.borrow_mut();
            state.entries.push((property, value));
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.outstanding == 0 {
                let entries = std::mem::take(&mut state.entries);
                state.pending.take().map(|pending| (pending, entries))
            } else {
                None
            }
        };
        if let Some((pending, entries)) = ready {
            pending.reply(vec![Value::dict_sv(entries)]);
        }
    }

    fn fail(state: &Rc<RefCell<Self>>, error: BusError) {
        let pending = state.borrow_mut().pending.take();
        if let Some(pending) = pending {
            pending.reply_error(error);
        }
    }
}

/// A bus object: descriptors, handler, and per-object state.
pub struct Service<H> {
    handler: H,
    table: DispatchTable<H>,
    ctx: ServiceContext,
    introspection: String,
}

impl<H> Service<H> {
    /// Assembles a service, validating the table against the descriptors.
    pub fn new(
        path: &str,
        interfaces: Vec<InterfaceDescriptor>,
        table: DispatchTable<H>,
        handler: H,
        bus: Rc<dyn BusConnection>,
    ) -> Result<Self> {
        if !value::is_valid_object_path(path) {
            return Err(Error::InvalidPath(path.to_string()));
        }
        for (index, descriptor) in interfaces.iter().enumerate() {
            let name = descriptor.name();
            if [PROPERTIES_INTERFACE, INTROSPECTABLE_INTERFACE, PEER_INTERFACE].contains(&name) {
                return Err(Error::ReservedInterface(name.to_string()));
            }
            if interfaces[..index].iter().any(|d| d.name() == name) {
                return Err(Error::DuplicateInterface(name.to_string()));
            }
        }
        table.validate(&interfaces)?;

        let introspection = introspect::to_xml(&interfaces);
        Ok(Self {
            handler,
            table,
            ctx: ServiceContext {
                path: path.to_string(),
                interfaces: interfaces.into(),
                bus,
                cache: PropertyCache::new(),
                resolver: Resolver::new(),
                error_namespace: DEFAULT_ERROR_NAMESPACE.to_string(),
            },
            introspection,
        })
    }

    /// Namespace for failure categories that carry none of their own.
    pub fn with_error_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.ctx.error_namespace = namespace.into();
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ServiceContext {
        &mut self.ctx
    }

    /// Splits the service into its handler and context.
    pub fn parts(&mut self) -> (&mut H, &mut ServiceContext) {
        (&mut self.handler, &mut self.ctx)
    }

    pub fn interface_names(&self) -> Vec<&str> {
        self.ctx.interfaces.iter().map(|d| d.name()).collect()
    }

    pub fn introspection(&self) -> &str {
        &self.introspection
    }

    /// Routes one inbound call and answers `pending` (now, or later if deferred).
    pub fn handle_call(&mut self, call: MethodCall, pending: PendingCall) {
        let interface = call.interface.clone().unwrap_or_default();
        let member = call.member.clone();
        let mut pending = Some(pending);

        let routed = std::panic::catch_unwind(AssertUnwindSafe(|| self.route(call, &mut pending)));
        let result = routed.unwrap_or_else(|_| {
            error!(path = %self.ctx.path, interface = %interface, member = %member, "handler panicked");
            Err(HandlerError::Failed(format!("handler for '{}' panicked", member)))
        });

        match (result, pending.take()) {
            (Ok(Outcome::Reply(values)), Some(pending)) => pending.reply(values),
            (Ok(Outcome::Deferred), _) => {
                debug!(path = %self.ctx.path, interface = %interface, member = %member, "reply deferred");
            }
            (Err(e), Some(pending)) => {
                debug!(interface = %interface, member = %member, error = %e, "call failed");
                pending.reply_error(e.into_bus_error(&self.ctx.error_namespace));
            }
            (_, None) => {
                warn!(interface = %interface, member = %member, "reply slot already consumed");
            }
        }
    }

    /// Delivers a fetched value to the oldest (or the identified) deferred read.
    pub fn resolve_fetch(&mut self, property: &str, id: Option<FetchId>, value: Value) -> bool {
        self.ctx.resolver.resolve(property, id, value)
    }

    /// Answers the oldest (or the identified) deferred read with an error.
    pub fn fail_fetch(&mut self, property: &str, id: Option<FetchId>, error: HandlerError) -> bool {
        let error = error.into_bus_error(&self.ctx.error_namespace);
        self.ctx.resolver.fail(property, id, error)
    }

    /// Drops every deferred read without answering it.
    pub fn abandon_fetches(&mut self) -> usize {
        self.ctx.resolver.abandon_all()
    }

    fn route(&mut self, call: MethodCall, pending: &mut Option<PendingCall>) -> HandlerResult<Outcome> {
        if call.path != self.ctx.path {
            return Err(HandlerError::UnknownObject(call.path));
        }

        let MethodCall { interface, member, args, fds, .. } = call;
        let interface = match interface {
            Some(interface) => interface,
            None => self.owner_of(&member).ok_or_else(|| HandlerError::UnknownMethod {
                interface: String::new(),
                method: member.clone(),
            })?,
        };

        match (interface.as_str(), member.as_str()) {
            (PROPERTIES_INTERFACE, "Get") => self.property_get(args, pending),
            (PROPERTIES_INTERFACE, "GetAll") => self.property_get_all(args, pending),
            (PROPERTIES_INTERFACE, "Set") => self.property_set(args),
            (INTROSPECTABLE_INTERFACE, "Introspect") if args.is_empty() => {
                Ok(Outcome::Reply(vec![Value::str(self.introspection.clone())]))
            }
            (PEER_INTERFACE, "Ping") if args.is_empty() => Ok(Outcome::Reply(Vec::new())),
            (PROPERTIES_INTERFACE | INTROSPECTABLE_INTERFACE | PEER_INTERFACE, _) => {
                Err(HandlerError::UnknownMethod { interface: interface.clone(), method: member.clone() })
            }
            _ => self.invoke(&interface, &member, args, &fds),
        }
    }

    fn owner_of(&self, member: &str) -> Option<String> {
        self.ctx
            .interfaces
            .iter()
            .find(|d| d.method(member).is_some())
            .map(|d| d.name().to_string())
    }

    fn invoke(&mut self, interface: &str, member: &str, args: Vec<Value>, fds: &[Fd]) -> HandlerResult<Outcome> {
        let interfaces = self.ctx.interfaces.clone();
        let descriptor = interfaces
            .iter()
            .find(|d| d.name() == interface)
            .ok_or_else(|| HandlerError::UnknownInterface(interface.to_string()))?;
        let unknown = || HandlerError::UnknownMethod {
            interface: interface.to_string(),
            method: member.to_string(),
        };
        let spec = descriptor.method(member).ok_or_else(unknown)?;
        let method = self.table.method_fn(interface, member).ok_or_else(unknown)?;

        let args = unpack_args(&spec.inputs, args, fds)?;
        let outputs = method(&mut self.handler, &mut self.ctx, args)?;
        check_outputs(member, &spec.outputs, &outputs)?;
        Ok(Outcome::Reply(outputs))
    }

    fn property_spec(&self, interface: &str, property: &str) -> HandlerResult<PropertySpec> {
        self.ctx
            .interface(interface)
            .ok_or_else(|| HandlerError::UnknownInterface(interface.to_string()))?
            .property(property)
            .cloned()
            .ok_or_else(|| HandlerError::UnknownProperty {
                interface: interface.to_string(),
                property: property.to_string(),
            })
    }

    fn read_property(&self, interface: &str, property: &str) -> HandlerResult<Read<H>> {
        match self.table.source(interface, property) {
            PropertySource::Cache => self
                .ctx
                .cache
                .get(property)
                .cloned()
                .map(Read::Ready)
                .ok_or_else(|| HandlerError::Failed(format!("property '{}' has no value yet", property))),
            PropertySource::Getter(get) => get(&self.handler, &self.ctx).map(Read::Ready),
            PropertySource::Remote(fetch) => Ok(Read::Remote(fetch)),
        }
    }

    fn property_get(&mut self, args: Vec<Value>, pending: &mut Option<PendingCall>) -> HandlerResult<Outcome> {
        let (interface, property) = match args.as_slice() {
            [Value::Str(interface), Value::Str(property)] => (interface.clone(), property.clone()),
            _ => return Err(HandlerError::InvalidArgs("Get expects (ss)".into())),
        };
        let spec = self.property_spec(&interface, &property)?;
        if !spec.access.readable() {
            return Err(HandlerError::PropertyWriteOnly(property));
        }

        match self.read_property(&interface, &property)? {
            Read::Ready(value) => Ok(Outcome::Reply(vec![Value::variant(value)])),
            Read::Remote(fetch) => {
                let id = self.ctx.resolver.allocate();
                fetch(&mut self.handler, &mut self.ctx, id)?;
                if let Some(call) = pending.take() {
                    let continuation = move |outcome: FetchOutcome| match outcome {
                        Ok(value) => call.reply(vec![Value::variant(value)]),
                        Err(error) => call.reply_error(error),
                    };
                    self.ctx.resolver.park(&property, id, Box::new(continuation));
                    debug!(property = %property, id = %id, "Get parked behind remote fetch");
                }
                Ok(Outcome::Deferred)
            }
        }
    }

    fn property_get_all(&mut self, args: Vec<Value>, pending: &mut Option<PendingCall>) -> HandlerResult<Outcome> {
        let interface = match args.as_slice() {
            [Value::Str(interface)] => interface.clone(),
            _ => return Err(HandlerError::InvalidArgs("GetAll expects (s)".into())),
        };
        let interfaces = self.ctx.interfaces.clone();
        let descriptor = interfaces
            .iter()
            .find(|d| d.name() == interface)
            .ok_or_else(|| HandlerError::UnknownInterface(interface.clone()))?;

        let mut entries = Vec::new();
        let mut remote = Vec::new();
        for spec in descriptor.readable_properties() {
            match self.read_property(&interface, &spec.name) {
                Ok(Read::Ready(value)) => entries.push((spec.name.clone(), value)),
                Ok(Read::Remote(fetch)) => remote.push((spec.name.clone(), fetch)),
                Err(e) => debug!(property = %spec.name, error = %e, "omitted from GetAll"),
            }
        }

        if remote.is_empty() {
            return Ok(Outcome::Reply(vec![Value::dict_sv(entries)]));
        }

        // The reply slot stays with `handle_call` until every fetch is out.
        let mut parked = Vec::with_capacity(remote.len());
        for (property, fetch) in remote {
            let id = self.ctx.resolver.allocate();
            fetch(&mut self.handler, &mut self.ctx, id)?;
            parked.push((property, id));
        }
        let Some(call) = pending.take() else { return Ok(Outcome::Deferred) };

        let state = Rc::new(RefCell::new(DeferredGetAll {
            pending: Some(call),
            entries,
            outstanding: parked.len(),
        }));
        for (property, id) in parked {
            let slot = state.clone();
            let name = property.clone();
            let continuation = move |outcome| DeferredGetAll::settle(&slot, name, outcome);
            self.ctx.resolver.park(&property, id, Box::new(continuation));
            debug!(property = %property, id = %id, "GetAll parked behind remote fetch");
        }
        Ok(Outcome::Deferred)
    }

    fn property_set(&mut self, args: Vec<Value>) -> HandlerResult<Outcome> {
        let mut args = args.into_iter();
        let (interface, property, value) = match (args.next(), args.next(), args.next(), args.next()) {
            (Some(Value::Str(interface)), Some(Value::Str(property)), Some(Value::Variant(value)), None) => {
                (interface, property, *value)
            }
            _ => return Err(HandlerError::InvalidArgs("Set expects (ssv)".into())),
        };

        let spec = self.property_spec(&interface, &property)?;
        if !spec.access.writable() {
            return Err(HandlerError::PropertyReadOnly(property));
        }
        if value.signature() != spec.signature {
            return Err(HandlerError::InvalidArgs(format!(
                "property '{}' has type '{}', got '{}'",
                property,
                spec.signature,
                value.signature()
            )));
        }

        match self.table.setter_fn(&interface, &property) {
            Some(set) => set(&mut self.handler, &mut self.ctx, value)?,
            None => {
                self.ctx.cache.insert(property, value);
            }
        }
        Ok(Outcome::Reply(Vec::new()))
    }
}

/// Checks argument count and types; resolves `h` indices through the call's descriptor table.
fn unpack_args(inputs: &[Arg], args: Vec<Value>, fds: &[Fd]) -> HandlerResult<Vec<Value>> {
    if args.len() != inputs.len() {
        return Err(HandlerError::InvalidArgs(format!(
            "expected {} arguments, got {}",
            inputs.len(),
            args.len()
        )));
    }

    args.into_iter()
        .zip(inputs)
        .map(|(arg, input)| match (input.signature.as_str(), arg) {
            ("h", Value::UnixFd(index)) => usize::try_from(index)
                .ok()
                .and_then(|index| fds.get(index))
                .map(|fd| Value::UnixFd(*fd))
                .ok_or_else(|| {
                    HandlerError::InvalidArgs(format!("descriptor index {} out of range", index))
                }),
            (_, arg) if arg.signature() == input.signature => Ok(arg),
            (_, arg) => Err(HandlerError::InvalidArgs(format!(
                "argument '{}' has type '{}', got '{}'",
                input.name,
                input.signature,
                arg.signature()
            ))),
        })
        .collect()
}

/// Checks handler outputs against the declared output list.
fn check_outputs(member: &str, outputs: &[Arg], values: &[Value]) -> HandlerResult<()> {
    if outputs.len() != values.len() {
        return Err(HandlerError::Failed(format!(
            "'{}' returned {} values but declares {}",
            member,
            values.len(),
            outputs.len()
        )));
    }
    for (decl, value) in outputs.iter().zip(values) {
        if decl.signature != value.signature() {
            return Err(HandlerError::Failed(format!(
                "'{}' output '{}' has type '{}', declared '{}'",
                member,
                decl.name,
                value.signature(),
                decl.signature
            )));
        }
    }
    Ok(())
}
