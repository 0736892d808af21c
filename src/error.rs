//! Error types for the sync engine.

use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A draft that cannot enter the record model.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ValidationError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Amount is not a number: {0:?}")]
    NonNumericAmount(String),

    #[error("Amount must be greater than zero, got {0}")]
    NonPositiveAmount(f64),

    #[error("Unknown category: {0:?}")]
    UnknownCategory(String),
}

/// Classification of remote failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Network trouble, timeouts, temporary unavailability. Worth retrying.
    Transient,
    /// Rejected by the remote (constraint violation, malformed row).
    Permanent,
    /// Credentials missing or expired.
    Auth,
}

/// A failed call against the remote store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    pub code: Option<String>,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind: RemoteErrorKind::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind: RemoteErrorKind::Permanent,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            kind: RemoteErrorKind::Auth,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Whether another attempt could succeed without outside intervention.
    pub fn is_retryable(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Local slot read/write failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Decoding error: {0}")]
    Decode(String),

    #[error("Local slot is locked by another process")]
    Locked,
}

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid expense: {0}")]
    Validation(#[from] ValidationError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Record already exists: {0}")]
    DuplicateRecord(RecordId),

    #[error("No owning session")]
    NoSession,

    #[error("Session changed while the operation was in flight")]
    SessionChanged,

    #[error("Engine has been shut down")]
    ShutDown,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<rmp_serde::encode::Error> for SyncError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SyncError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_includes_code() {
        let err = RemoteError::permanent("duplicate key").with_code("23505");
        assert_eq!(err.to_string(), "duplicate key (23505)");
        assert!(!err.is_retryable());

        let err = RemoteError::transient("connection reset");
        assert_eq!(err.to_string(), "connection reset");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_remote_error_converts_into_sync_error() {
        let err: SyncError = RemoteError::auth("jwt expired").into();
        assert!(matches!(err, SyncError::Remote(ref e) if e.kind == RemoteErrorKind::Auth));
    }
}
