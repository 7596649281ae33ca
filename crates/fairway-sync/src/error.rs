//! # Sync Error Types
//!
//! Error types for engine operations. The request layer does not use these:
//! it reports failures as [`fairway_core::ApiError`] values.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Input       │  │     Collaborators       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unknown        │  │  Storage (StoreError)   │ │
//! │  │  InvalidUrl     │  │   Collection    │  │  Remote (RemoteError)   │ │
//! │  │  ConfigLoad/    │  │  InvalidChange  │  │  Serialization          │ │
//! │  │   SaveFailed    │  │  FailedNotFound │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ Runtime: ShuttingDown, ChannelError                              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use fairway_core::CoreError;
use fairway_store::StoreError;
use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering engine, agent and configuration failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Collection name is malformed or not configured.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Change payload is structurally unusable.
    #[error("Invalid change: {0}")]
    InvalidChange(String),

    /// No dead-lettered change with this id.
    #[error("No failed change with id {0}")]
    FailedChangeNotFound(String),

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Local store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Remote store failure.
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Failed to serialize or parse a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCollection(name) => SyncError::UnknownCollection(name),
            CoreError::UnknownPolicy(_) => SyncError::InvalidConfig(err.to_string()),
            other => SyncError::InvalidChange(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// Remote failures defer to [`RemoteError::is_retryable`]; configuration
    /// and input errors never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::ChannelError(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
