//! Bridge configuration, loaded from TOML.

use serde::Deserialize;

use busobj::value;

#[derive(Debug)]
pub enum Error {
    Parse(toml::de::Error),
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "config parse error: {}", e),
            Self::Invalid { field, reason } => write!(f, "invalid '{}': {}", field, reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Well-known name of the first session. Later concurrent sessions add an
    /// `.instance<id>` suffix.
    pub bus_name: String,
    pub object_path: String,
    /// Prefix of the object paths that stand for remote track ids.
    pub track_path_prefix: String,
    pub identity: String,
    pub desktop_entry: Option<String>,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_len: usize,
    pub log_filter: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus_name: "org.mpris.MediaPlayer2.browser".into(),
            object_path: "/org/mpris/MediaPlayer2".into(),
            track_path_prefix: "/org/mpris/MediaPlayer2/Track".into(),
            identity: "Browser".into(),
            desktop_entry: None,
            max_frame_len: jsonframe::DEFAULT_MAX_FRAME_LEN,
            log_filter: "info".into(),
        }
    }
}

impl BridgeConfig {
    /// Parses and validates a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: &str| Err(Error::Invalid { field, reason: reason.to_string() });

        if !value::is_valid_dotted_name(&self.bus_name, true) {
            return invalid("bus_name", "not a well-known bus name");
        }
        if !value::is_valid_object_path(&self.object_path) {
            return invalid("object_path", "not an object path");
        }
        if !value::is_valid_object_path(&self.track_path_prefix) || self.track_path_prefix == "/" {
            return invalid("track_path_prefix", "not an object path below the root");
        }
        if self.identity.is_empty() {
            return invalid("identity", "must not be empty");
        }
        if self.max_frame_len == 0 {
            return invalid("max_frame_len", "must be positive");
        }
        Ok(())
    }
}
