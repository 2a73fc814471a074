//! # Interface Descriptors
//!
//! Static declarations of the methods, properties, and signals an object exposes.
//! A descriptor is built once per service type and never mutated afterwards.
//!
//! ## Philosophy
//!
//! - **Startup Validation**: names and signatures are checked when the descriptor
//!   is built, so dispatch never meets a malformed declaration.
//! - **Schema Registry**: lookups by member name are linear scans over short
//!   tables; declaration order is preserved for introspection and `GetAll`.

use crate::value;
use crate::value::Signature;

/// Descriptor errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The interface name is not a valid dotted name.
    InvalidInterfaceName(String),
    /// A member name is not a valid identifier.
    InvalidMemberName { interface: String, member: String },
    /// A member carries an invalid signature.
    InvalidSignature { interface: String, member: String, source: value::Error },
    /// Two members of the same kind share a name.
    Duplicate { interface: String, member: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInterfaceName(name) => write!(f, "invalid interface name '{}'", name),
            Self::InvalidMemberName { interface, member } => {
                write!(f, "invalid member name '{}' in '{}'", member, interface)
            }
            Self::InvalidSignature { interface, member, source } => {
                write!(f, "'{}.{}' has an invalid signature: {}", interface, member, source)
            }
            Self::Duplicate { interface, member } => {
                write!(f, "'{}' declares '{}' twice", interface, member)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidSignature { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read/write capability of a property.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// The introspection spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
        }
    }
}

/// A named, typed argument.
#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    pub name: String,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodSpec {
    pub name: String,
    pub inputs: Vec<Arg>,
    pub outputs: Vec<Arg>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub signature: Signature,
    pub access: Access,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignalSpec {
    pub name: String,
    pub args: Vec<Arg>,
}

/// The validated declaration of one interface.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceDescriptor {
    name: String,
    methods: Vec<MethodSpec>,
    properties: Vec<PropertySpec>,
    signals: Vec<SignalSpec>,
}

impl InterfaceDescriptor {
    /// Starts a declaration for the named interface.
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            name: name.into(),
            methods: Vec::new(),
            properties: Vec::new(),
            signals: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }

    pub fn properties(&self) -> &[PropertySpec] {
        &self.properties
    }

    pub fn signals(&self) -> &[SignalSpec] {
        &self.signals
    }

    pub fn method(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalSpec> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Readable properties in declaration order.
    pub fn readable_properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.iter().filter(|p| p.access.readable())
    }
}

type RawArgs = Vec<(String, String)>;

/// Collects raw declarations; `build` validates them all at once.
pub struct InterfaceBuilder {
    name: String,
    methods: Vec<(String, RawArgs, RawArgs)>,
    properties: Vec<(String, String, Access)>,
    signals: Vec<(String, RawArgs)>,
}

fn raw_args(args: &[(&str, &str)]) -> RawArgs {
    args.iter().map(|(n, s)| (n.to_string(), s.to_string())).collect()
}

impl InterfaceBuilder {
    /// Declares a method with ordered `(name, signature)` inputs and outputs.
    pub fn method(mut self, name: &str, inputs: &[(&str, &str)], outputs: &[(&str, &str)]) -> Self {
        self.methods.push((name.to_string(), raw_args(inputs), raw_args(outputs)));
        self
    }

    pub fn property(mut self, name: &str, signature: &str, access: Access) -> Self {
        self.properties.push((name.to_string(), signature.to_string(), access));
        self
    }

    pub fn signal(mut self, name: &str, args: &[(&str, &str)]) -> Self {
        self.signals.push((name.to_string(), raw_args(args)));
        self
    }

    /// Validates every name and signature and freezes the declaration.
    pub fn build(self) -> Result<InterfaceDescriptor> {
        let interface = self.name;
        if !value::is_valid_dotted_name(&interface, false) {
            return Err(Error::InvalidInterfaceName(interface));
        }

        let check_name = |member: &str, seen: &mut Vec<String>| -> Result<()> {
            if !value::is_valid_member_name(member) {
                return Err(Error::InvalidMemberName {
                    interface: interface.clone(),
                    member: member.to_string(),
                });
            }
            if seen.iter().any(|s| s == member) {
                return Err(Error::Duplicate {
                    interface: interface.clone(),
                    member: member.to_string(),
                });
            }
            seen.push(member.to_string());
            Ok(())
        };

        let parse = |member: &str, signature: &str| -> Result<Signature> {
            Signature::new(signature).map_err(|source| Error::InvalidSignature {
                interface: interface.clone(),
                member: member.to_string(),
                source,
            })
        };

        let parse_args = |member: &str, args: RawArgs| -> Result<Vec<Arg>> {
            args.into_iter()
                .map(|(name, signature)| {
                    Ok(Arg { signature: parse(member, &signature)?, name })
                })
                .collect()
        };

        let mut seen = Vec::new();
        let mut methods = Vec::with_capacity(self.methods.len());
        for (name, inputs, outputs) in self.methods {
            check_name(&name, &mut seen)?;
            methods.push(MethodSpec {
                inputs: parse_args(&name, inputs)?,
                outputs: parse_args(&name, outputs)?,
                name,
            });
        }

        let mut seen = Vec::new();
        let mut properties = Vec::with_capacity(self.properties.len());
        for (name, signature, access) in self.properties {
            check_name(&name, &mut seen)?;
            properties.push(PropertySpec { signature: parse(&name, &signature)?, name, access });
        }

        let mut seen = Vec::new();
        let mut signals = Vec::with_capacity(self.signals.len());
        for (name, args) in self.signals {
            check_name(&name, &mut seen)?;
            signals.push(SignalSpec { args: parse_args(&name, args)?, name });
        }

        Ok(InterfaceDescriptor { name: interface, methods, properties, signals })
    }
}
