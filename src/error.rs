//! Bridge error types

use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid process invocation
    #[error("Usage error: {0}")]
    Usage(String),

    /// Upstream stream could not be opened or failed mid-iteration
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Output protocol channel is broken or was misused
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the retry controller may recover from this failure.
    ///
    /// Only upstream failures qualify. Everything else means the bridge
    /// itself is broken and retrying cannot help.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream(_))
    }

    /// Message suitable for an `error` line on the wire.
    ///
    /// Upstream failures are reported without the category prefix so the
    /// consumer sees the upstream's own wording.
    pub fn wire_message(&self) -> String {
        match self {
            Error::Upstream(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;
