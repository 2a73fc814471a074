//! # BusObj
//!
//! Exposes handler objects on a message bus from declarative interface
//! descriptors.
//!
//! ## Layers
//!
//! - **Value Model** (`value`): typed bus values, signatures, and their JSON mapping.
//! - **Descriptors** (`descriptor`): validated interface shapes, built once.
//! - **Dispatch** (`dispatch`): routes calls to handler functions and answers the
//!   property protocol from a cache, a getter, or a deferred remote fetch.
//! - **Bus Boundary** (`bus`): the traits a concrete connection implements.
//!   `mock_bus` is an in-memory implementation for tests.
//!
//! Everything runs on one thread. Shared state is `Rc<RefCell<_>>`.

pub mod bus;
pub mod cache;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod introspect;
pub mod mock_bus;
pub mod resolver;
pub mod value;

#[cfg(test)]
mod tests;

pub use bus::BusConnection;
pub use bus::BusConnector;
pub use bus::MethodCall;
pub use bus::PendingCall;
pub use cache::PropertyCache;
pub use descriptor::Access;
pub use descriptor::InterfaceDescriptor;
pub use dispatch::DispatchTable;
pub use dispatch::Service;
pub use dispatch::ServiceContext;
pub use error::BusError;
pub use error::HandlerError;
pub use error::HandlerResult;
pub use resolver::FetchId;
pub use value::Signature;
pub use value::Value;
