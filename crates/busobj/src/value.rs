//! # Value Model
//!
//! Typed bus values, their signatures, and the translation to and from JSON.
//!
//! ## Invariants
//! - **Signature Strictness**: `Signature` always holds exactly one complete type.
//! - **Recursion Safety**: signature parsing is bounded by `MAX_DEPTH`.
//! - **Declared Types Win**: `from_json` wraps a JSON value in the declared type;
//!   only `v` infers a type from the JSON value itself.

use serde_json::Value as Json;

/// The maximum nesting depth of a signature.
const MAX_DEPTH: usize = 64;

/// Longest signature the bus accepts.
const MAX_SIGNATURE_LEN: usize = 255;

/// Value model failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The signature is empty, malformed, or not a single complete type.
    InvalidSignature { signature: String, reason: String },
    /// The value does not have the expected shape.
    TypeMismatch { expected: String, found: String },
    /// A number does not fit the declared integer type.
    OutOfRange { signature: String, value: String },
    /// The string is not a valid object path.
    InvalidObjectPath(String),
    /// The value has no representation on the other side (e.g. NaN, descriptors, null).
    NotRepresentable(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSignature { signature, reason } => {
                write!(f, "invalid signature '{}': {}", signature, reason)
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected '{}', found {}", expected, found)
            }
            Self::OutOfRange { signature, value } => {
                write!(f, "{} does not fit type '{}'", value, signature)
            }
            Self::InvalidObjectPath(path) => write!(f, "invalid object path '{}'", path),
            Self::NotRepresentable(what) => write!(f, "value is not representable: {}", what),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  SIGNATURES
// ============================================================================

/// A single complete type signature, e.g. `s`, `as`, `a{sv}`, `(ox)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    /// Parses and validates a single complete type.
    pub fn new(signature: impl Into<String>) -> Result<Self> {
        let signature = signature.into();
        let invalid = |reason: String| Error::InvalidSignature {
            signature: signature.clone(),
            reason,
        };

        if signature.is_empty() {
            return Err(invalid("empty".into()));
        }
        if signature.len() > MAX_SIGNATURE_LEN {
            return Err(invalid(format!("longer than {} bytes", MAX_SIGNATURE_LEN)));
        }
        let end = parse_one(signature.as_bytes(), 0, 0).map_err(invalid)?;
        if end != signature.len() {
            return Err(invalid("trailing types after the first complete type".into()));
        }
        Ok(Self(signature))
    }

    /// Splits a sequence of complete types (a method's argument list, a struct body).
    pub fn split(sequence: &str) -> Result<Vec<Signature>> {
        let bytes = sequence.as_bytes();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let end = parse_one(bytes, pos, 0).map_err(|reason| Error::InvalidSignature {
                signature: sequence.to_string(),
                reason,
            })?;
            out.push(Self(sequence[pos..end].to_string()));
            pos = end;
        }
        Ok(out)
    }

    /// Builds a signature already known to be valid.
    fn trusted(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The leading type code.
    pub fn code(&self) -> u8 {
        self.0.as_bytes()[0]
    }

    /// True for the fixed-width and string-like types that may key a dict.
    pub fn is_basic(&self) -> bool {
        self.0.len() == 1 && is_basic(self.code())
    }

    /// The element type of a non-dict array.
    pub fn element(&self) -> Option<Signature> {
        if self.0.starts_with('a') && !self.0.starts_with("a{") {
            Some(Self::trusted(&self.0[1..]))
        } else {
            None
        }
    }

    /// Key and value types of a dict (`a{kv}`).
    pub fn dict_entry(&self) -> Option<(Signature, Signature)> {
        if !self.0.starts_with("a{") {
            return None;
        }
        let body = &self.0[2..self.0.len() - 1];
        Some((Self::trusted(&body[..1]), Self::trusted(&body[1..])))
    }

    /// Field types of a struct.
    pub fn fields(&self) -> Option<Vec<Signature>> {
        if !self.0.starts_with('(') {
            return None;
        }
        Self::split(&self.0[1..self.0.len() - 1]).ok()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_basic(code: u8) -> bool {
    b"ybnqiuxtdsogh".contains(&code)
}

/// Parses one complete type starting at `pos`, returning the index just past it.
fn parse_one(sig: &[u8], pos: usize, depth: usize) -> std::result::Result<usize, String> {
    if depth > MAX_DEPTH {
        return Err("nesting too deep".into());
    }

    match sig.get(pos) {
        None => Err("unexpected end".into()),
        Some(&code) if is_basic(code) || code == b'v' => Ok(pos + 1),
        Some(b'a') => match sig.get(pos + 1) {
            Some(b'{') => {
                match sig.get(pos + 2) {
                    Some(&key) if is_basic(key) => (),
                    Some(_) => return Err("dict key must be a basic type".into()),
                    None => return Err("unterminated dict entry".into()),
                }
                let end = parse_one(sig, pos + 3, depth + 1)?;
                match sig.get(end) {
                    Some(b'}') => Ok(end + 1),
                    _ => Err("dict entry must hold exactly one key and one value".into()),
                }
            }
            _ => parse_one(sig, pos + 1, depth + 1),
        },
        Some(b'(') => {
            let mut cursor = pos + 1;
            if sig.get(cursor) == Some(&b')') {
                return Err("empty struct".into());
            }
            while sig.get(cursor) != Some(&b')') {
                if cursor >= sig.len() {
                    return Err("unterminated struct".into());
                }
                cursor = parse_one(sig, cursor, depth + 1)?;
            }
            Ok(cursor + 1)
        }
        Some(&code) => Err(format!("invalid type code '{}'", code as char)),
    }
}

// ============================================================================
//  NAMES AND PATHS
// ============================================================================

/// Checks the object path grammar: `/` or `/seg(/seg)*` with segments of `[A-Za-z0-9_]+`.
pub fn is_valid_object_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else { return false };
    rest.split('/').all(|segment| {
        !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

/// Checks a dotted name (interface, error, or well-known bus name).
///
/// At least two elements, none empty, none starting with a digit. Bus names
/// additionally allow `-` inside elements.
pub fn is_valid_dotted_name(name: &str, allow_hyphen: bool) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    let elements: Vec<&str> = name.split('.').collect();
    elements.len() >= 2
        && elements.iter().all(|element| {
            let mut bytes = element.bytes();
            match bytes.next() {
                Some(first) if first.is_ascii_alphabetic() || first == b'_' || (allow_hyphen && first == b'-') => (),
                _ => return false,
            }
            bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || (allow_hyphen && b == b'-'))
        })
}

/// Checks a member name (method, property, signal): `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_member_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_alphabetic() || first == b'_' => (),
        _ => return false,
    }
    name.len() <= 255 && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

// ============================================================================
//  VALUES
// ============================================================================

/// A typed bus value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Signature(Signature),
    /// A file descriptor. In call payloads this is an index into the call's
    /// descriptor table until the dispatcher resolves it.
    UnixFd(i32),
    Variant(Box<Value>),
    Array { elem: Signature, items: Vec<Value> },
    Dict { key: Signature, value: Signature, entries: Vec<(Value, Value)> },
    Struct(Vec<Value>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn variant(inner: Value) -> Self {
        Self::Variant(Box::new(inner))
    }

    /// An `as` array.
    pub fn string_array<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array {
            elem: Signature::trusted("s"),
            items: items.into_iter().map(|s| Self::Str(s.into())).collect(),
        }
    }

    /// An `a{sv}` dict; each value is wrapped in a variant.
    pub fn dict_sv<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self::Dict {
            key: Signature::trusted("s"),
            value: Signature::trusted("v"),
            entries: entries
                .into_iter()
                .map(|(k, v)| (Self::Str(k.into()), Self::variant(v)))
                .collect(),
        }
    }

    /// Computes this value's signature.
    pub fn signature(&self) -> Signature {
        Signature::trusted(self.signature_string())
    }

    fn signature_string(&self) -> String {
        match self {
            Self::Bool(_) => "b".into(),
            Self::Byte(_) => "y".into(),
            Self::Int16(_) => "n".into(),
            Self::UInt16(_) => "q".into(),
            Self::Int32(_) => "i".into(),
            Self::UInt32(_) => "u".into(),
            Self::Int64(_) => "x".into(),
            Self::UInt64(_) => "t".into(),
            Self::Double(_) => "d".into(),
            Self::Str(_) => "s".into(),
            Self::ObjectPath(_) => "o".into(),
            Self::Signature(_) => "g".into(),
            Self::UnixFd(_) => "h".into(),
            Self::Variant(_) => "v".into(),
            Self::Array { elem, .. } => format!("a{}", elem),
            Self::Dict { key, value, .. } => format!("a{{{}{}}}", key, value),
            Self::Struct(fields) => {
                let body: String = fields.iter().map(|f| f.signature_string()).collect();
                format!("({})", body)
            }
        }
    }

    /// Unwraps any number of variant layers.
    pub fn peel(&self) -> &Value {
        match self {
            Self::Variant(inner) => inner.peel(),
            other => other,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.peel() {
            Self::Str(s) | Self::ObjectPath(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self.peel() {
            Self::Byte(v) => Some(v.into()),
            Self::Int16(v) => Some(v.into()),
            Self::UInt16(v) => Some(v.into()),
            Self::Int32(v) => Some(v.into()),
            Self::UInt32(v) => Some(v.into()),
            Self::Int64(v) => Some(v),
            Self::UInt64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self.peel() {
            Self::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self.peel() {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a string key in a dict value.
    pub fn dict_get(&self, key: &str) -> Option<&Value> {
        match self.peel() {
            Self::Dict { entries, .. } => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    //  JSON -> Value
    // ------------------------------------------------------------------------

    /// Wraps a JSON value in the declared type.
    pub fn from_json(json: &Json, signature: &Signature) -> Result<Self> {
        from_json_impl(json, signature, 0)
    }

    /// Infers a bus type for a JSON value (the `v` case).
    pub fn infer_json(json: &Json) -> Result<Self> {
        infer_json_impl(json, 0)
    }

    // ------------------------------------------------------------------------
    //  Value -> JSON
    // ------------------------------------------------------------------------

    /// Converts to JSON.
    ///
    /// # Errors
    /// `NotRepresentable` for non-finite doubles and file descriptors.
    pub fn to_json(&self) -> Result<Json> {
        Ok(match self {
            Self::Bool(v) => Json::Bool(*v),
            Self::Byte(v) => Json::from(*v),
            Self::Int16(v) => Json::from(*v),
            Self::UInt16(v) => Json::from(*v),
            Self::Int32(v) => Json::from(*v),
            Self::UInt32(v) => Json::from(*v),
            Self::Int64(v) => Json::from(*v),
            Self::UInt64(v) => Json::from(*v),
            Self::Double(v) => serde_json::Number::from_f64(*v)
                .map(Json::Number)
                .ok_or_else(|| Error::NotRepresentable(format!("non-finite double {}", v)))?,
            Self::Str(s) | Self::ObjectPath(s) => Json::String(s.clone()),
            Self::Signature(s) => Json::String(s.to_string()),
            Self::UnixFd(fd) => {
                return Err(Error::NotRepresentable(format!("file descriptor {}", fd)));
            }
            Self::Variant(inner) => inner.to_json()?,
            Self::Array { items, .. } => {
                Json::Array(items.iter().map(Value::to_json).collect::<Result<_>>()?)
            }
            Self::Dict { entries, .. } => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    let key = match k.to_json()? {
                        Json::String(s) => s,
                        other => other.to_string(),
                    };
                    map.insert(key, v.to_json()?);
                }
                Json::Object(map)
            }
            Self::Struct(fields) => {
                Json::Array(fields.iter().map(Value::to_json).collect::<Result<_>>()?)
            }
        })
    }
}

fn json_kind(json: &Json) -> String {
    match json {
        Json::Null => "null".into(),
        Json::Bool(_) => "bool".into(),
        Json::Number(n) => format!("number {}", n),
        Json::String(_) => "string".into(),
        Json::Array(_) => "array".into(),
        Json::Object(_) => "object".into(),
    }
}

/// Extracts an integral number, accepting floats with no fractional part.
fn json_integer(json: &Json) -> Option<i128> {
    if let Some(v) = json.as_i64() {
        return Some(v.into());
    }
    if let Some(v) = json.as_u64() {
        return Some(v.into());
    }
    let f = json.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1.8446744073709552e19 {
        Some(f as i128)
    } else {
        None
    }
}

fn from_json_impl(json: &Json, sig: &Signature, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::NotRepresentable("nesting too deep".into()));
    }
    let mismatch = || Error::TypeMismatch {
        expected: sig.to_string(),
        found: json_kind(json),
    };

    macro_rules! integer {
        ($variant:ident, $ty:ty) => {{
            let n = json_integer(json).ok_or_else(mismatch)?;
            let v = <$ty>::try_from(n).map_err(|_| Error::OutOfRange {
                signature: sig.to_string(),
                value: n.to_string(),
            })?;
            Value::$variant(v)
        }};
    }

    Ok(match sig.code() {
        b'b' => Value::Bool(json.as_bool().ok_or_else(mismatch)?),
        b'y' => integer!(Byte, u8),
        b'n' => integer!(Int16, i16),
        b'q' => integer!(UInt16, u16),
        b'i' => integer!(Int32, i32),
        b'u' => integer!(UInt32, u32),
        b'x' => integer!(Int64, i64),
        b't' => integer!(UInt64, u64),
        b'd' => Value::Double(json.as_f64().ok_or_else(mismatch)?),
        b's' => Value::Str(json.as_str().ok_or_else(mismatch)?.to_string()),
        b'o' => {
            let path = json.as_str().ok_or_else(mismatch)?;
            if !is_valid_object_path(path) {
                return Err(Error::InvalidObjectPath(path.to_string()));
            }
            Value::ObjectPath(path.to_string())
        }
        b'g' => Value::Signature(Signature::new(json.as_str().ok_or_else(mismatch)?)?),
        b'h' => return Err(Error::NotRepresentable("file descriptors cannot arrive as JSON".into())),
        b'v' => Value::variant(infer_json_impl(json, depth + 1)?),
        b'a' => match sig.dict_entry() {
            Some((key, value)) => {
                let object = json.as_object().ok_or_else(mismatch)?;
                let mut entries = Vec::with_capacity(object.len());
                for (k, v) in object {
                    let key_value = dict_key_from_str(k, &key)?;
                    entries.push((key_value, from_json_impl(v, &value, depth + 1)?));
                }
                Value::Dict { key, value, entries }
            }
            None => {
                let elem = sig.element().ok_or_else(mismatch)?;
                let array = json.as_array().ok_or_else(mismatch)?;
                let items = array
                    .iter()
                    .map(|item| from_json_impl(item, &elem, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array { elem, items }
            }
        },
        b'(' => {
            let fields = sig.fields().ok_or_else(mismatch)?;
            let array = json.as_array().ok_or_else(mismatch)?;
            if array.len() != fields.len() {
                return Err(mismatch());
            }
            let values = array
                .iter()
                .zip(fields.iter())
                .map(|(item, field)| from_json_impl(item, field, depth + 1))
                .collect::<Result<Vec<_>>>()?;
            Value::Struct(values)
        }
        _ => return Err(mismatch()),
    })
}

/// JSON object keys are always strings; numeric dict keys are parsed back out.
fn dict_key_from_str(key: &str, sig: &Signature) -> Result<Value> {
    match sig.code() {
        b's' | b'o' | b'g' => from_json_impl(&Json::String(key.to_string()), sig, 0),
        _ => {
            let parsed: Json = serde_json::from_str(key).map_err(|_| Error::TypeMismatch {
                expected: sig.to_string(),
                found: format!("key '{}'", key),
            })?;
            from_json_impl(&parsed, sig, 0)
        }
    }
}

fn infer_json_impl(json: &Json, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::NotRepresentable("nesting too deep".into()));
    }

    Ok(match json {
        Json::Null => return Err(Error::NotRepresentable("null has no bus type".into())),
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::Int64(v)
            } else if let Some(v) = n.as_u64() {
                Value::UInt64(v)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => {
            if !items.is_empty() && items.iter().all(Json::is_string) {
                Value::string_array(items.iter().filter_map(|i| i.as_str().map(str::to_string)))
            } else {
                let items = items
                    .iter()
                    .map(|item| infer_json_impl(item, depth + 1).map(Value::variant))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array { elem: Signature::trusted("v"), items }
            }
        }
        Json::Object(object) => {
            let mut entries = Vec::with_capacity(object.len());
            for (k, v) in object {
                entries.push((k.clone(), infer_json_impl(v, depth + 1)?));
            }
            Value::dict_sv(entries)
        }
    })
}
