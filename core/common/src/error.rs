//! Common error types for VaultKeep.

use std::sync::Arc;

use thiserror::Error;

/// Top-level error type for VaultKeep operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The master key could neither be fetched nor created.
    #[error("Master key unavailable: {0}")]
    KeyUnavailable(String),

    /// Ciphertext is corrupt, truncated, or was tampered with.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Ciphertext was sealed under a different key.
    #[error("Ciphertext was encrypted under a different key")]
    KeyMismatch,

    /// Cryptographic operation failed for a reason other than integrity.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Blob or secret storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The vault has not been prepared, or was locked.
    #[error("Vault is not ready")]
    NotReady,

    /// A shared preparation attempt failed.
    #[error("Vault preparation failed: {0}")]
    Prepare(Arc<Error>),
}

impl Error {
    /// True when stored ciphertext could not be turned back into plaintext.
    pub fn is_unreadable(&self) -> bool {
        match self {
            Error::Integrity(_) | Error::KeyMismatch => true,
            Error::Prepare(inner) => inner.is_unreadable(),
            _ => false,
        }
    }

    /// True for a missing resource, including a missing file on disk.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
