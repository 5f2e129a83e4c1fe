//! KEEL - Custom Error Types
//! Defines the error hierarchy for the storage engine.

use thiserror::Error;

/// Custom Result type for the Keel engine.
pub type Result<T> = std::result::Result<T, KeelError>;

/// Error types for the Keel storage engine.
#[derive(Error, Debug)]
pub enum KeelError {
    /// I/O errors from file operations (value log, index log, journal).
    /// Passed through untouched so disk and permission failures stay visible.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Empty or oversized key, or an operation on a collection key that is not present.
    #[error("Invalid key")]
    InvalidKey,

    /// Attempt to encode a record with a zero-length key.
    #[error("Invalid entry")]
    InvalidEntry,

    /// Lookup, prefix or range miss. An expected outcome, not a fault.
    #[error("Key not found")]
    KeyNotFound,

    /// The key existed but its TTL has lapsed.
    #[error("Key has expired")]
    ExpiredKey,

    /// The store or engine was already closed.
    #[error("Database closed")]
    DatabaseClosed,

    /// Blob serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (CRC mismatch).
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// A log offset or size no longer fits its on-disk field.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for KeelError {
    fn from(err: bincode::Error) -> Self {
        KeelError::Serialization(err.to_string())
    }
}
