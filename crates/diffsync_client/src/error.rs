//! Error types for the session client.

use diffsync_core::SyncError;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the session client and its driver.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid client configuration, e.g. a missing or unparsable server URL.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error returned by the sync engine.
    #[error(transparent)]
    Engine(#[from] SyncError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Config file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config could not be serialized.
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// IO error while reading or writing a config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
