//! Tracing subscriber setup.
//!
//! Logs go to stderr. Stdout is usually the peer channel and must carry frames only.

use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub enum Error {
    Filter(tracing_subscriber::filter::ParseError),
    /// A global subscriber is already installed.
    AlreadyInstalled(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filter(e) => write!(f, "invalid log filter: {}", e),
            Self::AlreadyInstalled(msg) => write!(f, "logging already initialized: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Installs the global subscriber. `RUST_LOG`, when set, overrides `filter`.
pub fn init(filter: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(filter).map_err(Error::Filter)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::AlreadyInstalled(e.to_string()))
}
