//! Error types for the lobby layer.
//!
//! Only `NotFound` and `TableFull` are meant to reach end users. Store
//! failures propagate as a generic failure; bus and presence failures are
//! logged by their callers and never surfaced.

use thiserror::Error;

/// Failures from the shared key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend transport or database failure.
    #[error("database error: {0}")]
    Database(String),
    /// A stored value could not be interpreted.
    #[error("codec error: {0}")]
    Codec(String),
    /// Scalar payload failed to (de)compress.
    #[error("compression error: {0}")]
    Compression(String),
    /// `incr` on a value that does not hold an integer.
    #[error("value at '{0}' is not an integer")]
    NotAnInteger(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Failures on the notification bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("transport closed")]
    Closed,
    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors returned by table and history operations.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// The referenced table is absent from the store (or already expired).
    #[error("table {0} not found")]
    NotFound(String),
    /// Join attempted on a table that already seats two players.
    #[error("table {0} is full")]
    TableFull(String),
    /// The store is unreachable or failed mid-operation.
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
