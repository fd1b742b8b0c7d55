//! Error types for the NetScout core library

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias for NetScout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types covering validation, resolution, transport, and adapters
#[derive(Error, Debug)]
pub enum Error {
    /// Target string was empty or whitespace
    #[error("target is empty")]
    EmptyTarget,

    /// Target matched the placeholder blocklist
    #[error("placeholder target rejected: {0}")]
    Placeholder(String),

    /// DNS resolution failed for the supplied hostname
    #[error("unable to resolve target: {0}")]
    Unresolvable(String),

    /// Target is not permitted by policy
    #[error("target not permitted: {0}")]
    Disallowed(String),

    /// Malformed or oversize port specification
    #[error("invalid port specification: {0}")]
    InvalidPortSpec(String),

    /// Network-level failures outside per-probe classification
    #[error("network error: {0}")]
    Network(String),

    /// I/O errors with automatic conversion
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Service detection failures (probe never aborts a scan)
    #[error("detection error: {0}")]
    Detection(String),

    /// Persistence sink errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Task queue errors
    #[error("queue error: {0}")]
    Queue(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Scan was cancelled cooperatively
    #[error("scan cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error originates from request validation or resolution,
    /// as opposed to an internal or transient fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyTarget
                | Error::Placeholder(_)
                | Error::Unresolvable(_)
                | Error::Disallowed(_)
                | Error::InvalidPortSpec(_)
        )
    }

    /// Short machine-readable kind tag for wire error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::EmptyTarget => "empty_target",
            Error::Placeholder(_) => "placeholder_target",
            Error::Unresolvable(_) => "unresolvable",
            Error::Disallowed(_) => "disallowed",
            Error::InvalidPortSpec(_) => "invalid_port_spec",
            Error::Network(_) => "network",
            Error::Io(_) => "io",
            Error::Detection(_) => "detection",
            Error::Storage(_) => "storage",
            Error::Queue(_) => "queue",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Cancelled => "cancelled",
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::Network(format!("invalid IP address: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {}", err))
    }
}
