use std::string::FromUtf8Error;

use thiserror::Error;

/// Error type for bitkv.
#[derive(Error, Debug)]
pub enum KvsError {
    /// IO error
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization error (used for the READRANGE JSON payload).
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// Removing a non-existent key.
    #[error("Key not found")]
    KeyNotFound,
    /// A malformed request: unknown verb, missing argument, bad framing.
    #[error("{0}")]
    BadRequest(String),
    /// The log contained a record the index pointed at but that would not
    /// decode. It indicates a corrupted log or a program bug.
    #[error("corrupted record: {0}")]
    Corrupt(String),
    /// Key or value is not a valid UTF-8 sequence.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),
    /// Error with a free-form string message.
    #[error("{0}")]
    StringError(String),
}

/// Custom result type for KvsError
pub type Result<T> = std::result::Result<T, KvsError>;
