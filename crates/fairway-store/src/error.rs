//! # Store Error Types
//!
//! ## Error Flow
//! ```text
//! std::io::Error / serde_json::Error
//!       │
//!       ▼
//! StoreError (this module) ← Adds the key that failed
//!       │
//!       ▼
//! SyncError::Storage (fairway-sync) ← Surfaced as sync:error
//! ```

use thiserror::Error;

/// Local store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key contains characters that cannot be persisted.
    #[error("Invalid store key: '{0}'")]
    InvalidKey(String),

    /// Reading or writing the backing medium failed.
    #[error("I/O error on '{key}': {message}")]
    Io { key: String, message: String },

    /// Stored value does not parse as the expected type.
    #[error("Corrupt value under '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// Value could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Store is not usable (poisoned lock, missing directory).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(key: &str, err: std::io::Error) -> Self {
        StoreError::Io {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
