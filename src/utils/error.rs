use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Bad credential for {0}")]
    BadCredential(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Truncated transfer: expected {expected} bytes, received {received}")]
    TruncatedTransfer { expected: u64, received: u64 },

    #[error("Remote peer does not have file: {0}")]
    RemoteFileNotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    Internal(String),
}

/// Wire-level classification of a failure, carried in tracker responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadCredential,
    Validation,
    Internal,
}

impl P2PError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            P2PError::NotFound(_) => ErrorKind::NotFound,
            P2PError::Conflict(_) => ErrorKind::Conflict,
            P2PError::BadCredential(_) => ErrorKind::BadCredential,
            P2PError::ValidationError(_) => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        }
    }

    /// Rebuild an error reported by the tracker.
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::NotFound => P2PError::NotFound(message),
            ErrorKind::Conflict => P2PError::Conflict(message),
            ErrorKind::BadCredential => P2PError::BadCredential(message),
            ErrorKind::Validation => P2PError::ValidationError(message),
            ErrorKind::Internal => P2PError::Internal(message),
        }
    }

    /// Message text without the variant prefix, used when the error crosses the wire.
    pub fn detail(&self) -> String {
        match self {
            P2PError::NotFound(m)
            | P2PError::Conflict(m)
            | P2PError::BadCredential(m)
            | P2PError::ValidationError(m)
            | P2PError::Internal(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for P2PError {
    fn from(err: rusqlite::Error) -> Self {
        P2PError::StorageError(err.to_string())
    }
}
