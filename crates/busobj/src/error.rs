//! # Error Replies
//!
//! Handler failures and their mapping onto structured bus error replies.
//!
//! `HandlerError` is what handler code returns; `BusError` is what travels back
//! to the caller. The dispatcher converts one into the other at its boundary and
//! never lets a handler failure escape.

use crate::value;

/// Namespace of the standard error names.
pub const STANDARD_ERROR_NAMESPACE: &str = "org.freedesktop.DBus.Error";

/// Namespace given to failure categories that carry no namespace of their own.
pub const DEFAULT_ERROR_NAMESPACE: &str = "org.busobj.Error";

/// A structured error reply: an error name plus a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusError {
    pub name: String,
    pub message: String,
}

impl BusError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for BusError {}

/// Failures raised by handlers or by the dispatcher on their behalf.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerError {
    UnknownObject(String),
    UnknownInterface(String),
    UnknownMethod { interface: String, method: String },
    UnknownProperty { interface: String, property: String },
    PropertyReadOnly(String),
    PropertyWriteOnly(String),
    InvalidArgs(String),
    NotSupported(String),
    Failed(String),
    /// An application-defined category. A `kind` without a dot is placed under
    /// the dispatcher's error namespace.
    Custom { kind: String, message: String },
}

impl HandlerError {
    /// The category part of the error name.
    fn category(&self) -> &str {
        match self {
            Self::UnknownObject(_) => "UnknownObject",
            Self::UnknownInterface(_) => "UnknownInterface",
            Self::UnknownMethod { .. } => "UnknownMethod",
            Self::UnknownProperty { .. } => "UnknownProperty",
            Self::PropertyReadOnly(_) => "PropertyReadOnly",
            Self::PropertyWriteOnly(_) => "PropertyWriteOnly",
            Self::InvalidArgs(_) => "InvalidArgs",
            Self::NotSupported(_) => "NotSupported",
            Self::Failed(_) => "Failed",
            Self::Custom { kind, .. } => kind,
        }
    }

    /// The fully namespaced error name.
    pub fn error_name(&self, namespace: &str) -> String {
        match self {
            Self::Custom { kind, .. } if kind.contains('.') => kind.clone(),
            Self::Custom { kind, .. } => format!("{}.{}", namespace, kind),
            other => format!("{}.{}", STANDARD_ERROR_NAMESPACE, other.category()),
        }
    }

    pub fn into_bus_error(self, namespace: &str) -> BusError {
        BusError { name: self.error_name(namespace), message: self.to_string() }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownObject(path) => write!(f, "no object at '{}'", path),
            Self::UnknownInterface(name) => write!(f, "no such interface '{}'", name),
            Self::UnknownMethod { interface, method } => {
                write!(f, "no such method '{}' on interface '{}'", method, interface)
            }
            Self::UnknownProperty { interface, property } => {
                write!(f, "no such property '{}' on interface '{}'", property, interface)
            }
            Self::PropertyReadOnly(name) => write!(f, "property '{}' is read-only", name),
            Self::PropertyWriteOnly(name) => write!(f, "property '{}' is write-only", name),
            Self::InvalidArgs(msg) => write!(f, "invalid arguments: {}", msg),
            Self::NotSupported(msg) => write!(f, "not supported: {}", msg),
            Self::Failed(msg) => f.write_str(msg),
            Self::Custom { message, .. } => f.write_str(message),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<value::Error> for HandlerError {
    fn from(e: value::Error) -> Self {
        Self::InvalidArgs(e.to_string())
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;
