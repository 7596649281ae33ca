//! # Error Types
//!
//! Domain-specific error types for fairway-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fairway-core errors (this file)                                       │
//! │  ├── CoreError   - Rule violations (bad collection name, bad method)   │
//! │  ├── ErrorCode   - Closed request failure taxonomy                     │
//! │  └── ApiError    - What request callers see (code + message)           │
//! │                                                                         │
//! │  fairway-store errors (separate crate)                                 │
//! │  └── StoreError  - Local durable store failures                        │
//! │                                                                         │
//! │  fairway-sync errors (separate crate)                                  │
//! │  └── SyncError   - Engine / collaborator failures                      │
//! │                                                                         │
//! │  Flow: TransportError → ApiError → RemoteError → retry / dead letter   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

// =============================================================================
// Core Error
// =============================================================================

/// Rule violations detected without any I/O.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Collection names must be non-empty and made of `[a-z0-9_-]`.
    #[error("Invalid collection name: '{0}'")]
    InvalidCollection(String),

    /// Only GET/POST/PUT/PATCH/DELETE are accepted.
    #[error("Unsupported HTTP method: '{0}'")]
    InvalidMethod(String),

    /// Operation is not one of create/update/delete.
    #[error("Unknown operation: '{0}'")]
    UnknownOperation(String),

    /// Conflict policy string not recognised.
    #[error("Unknown conflict policy: '{0}'. Valid options: server-wins, client-wins, merge, manual")]
    UnknownPolicy(String),

    /// A change payload is structurally unusable.
    #[error("Invalid change: {reason}")]
    InvalidChange { reason: String },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Request Error Taxonomy
// =============================================================================

/// Closed set of request failure classes.
///
/// ## Status Mapping
/// ```text
/// 400, 422        → VALIDATION_ERROR   (fix input, do not retry)
/// 401, 403        → UNAUTHORIZED       (re-authenticate)
/// 404             → NOT_FOUND
/// 409             → DUPLICATE
/// anything else   → NETWORK_ERROR      (retry / queue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "DUPLICATE")]
    Duplicate,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
}

impl ErrorCode {
    /// Classifies an HTTP status code. Unmapped statuses are network-class.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorCode::Validation,
            401 | 403 => ErrorCode::Unauthorized,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Duplicate,
            _ => ErrorCode::Network,
        }
    }

    /// Only network-class failures are retried or queued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Network)
    }

    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::Network => "NETWORK_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized request failure.
///
/// Returned as the `Err` side of every request; never panics or escapes as
/// another error type.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status when the failure came from a response.
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            status: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Network, message)
    }

    /// Builds an error from a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        ApiError {
            code: ErrorCode::from_status(status),
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::from_status(400), ErrorCode::Validation);
        assert_eq!(ErrorCode::from_status(422), ErrorCode::Validation);
        assert_eq!(ErrorCode::from_status(401), ErrorCode::Unauthorized);
        assert_eq!(ErrorCode::from_status(403), ErrorCode::Unauthorized);
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(409), ErrorCode::Duplicate);
        assert_eq!(ErrorCode::from_status(500), ErrorCode::Network);
        assert_eq!(ErrorCode::from_status(418), ErrorCode::Network);
    }

    #[test]
    fn test_only_network_is_retryable() {
        assert!(ErrorCode::Network.is_retryable());
        assert!(!ErrorCode::Validation.is_retryable());
        assert!(!ErrorCode::Unauthorized.is_retryable());
        assert!(!ErrorCode::NotFound.is_retryable());
        assert!(!ErrorCode::Duplicate.is_retryable());
    }

    #[test]
    fn test_error_code_wire_names() {
        let json = serde_json::to_string(&ErrorCode::Validation).unwrap();
        assert_eq!(json, "\"VALIDATION_ERROR\"");
        let code: ErrorCode = serde_json::from_str("\"NETWORK_ERROR\"").unwrap();
        assert_eq!(code, ErrorCode::Network);
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::from_status(409, "booking already exists");
        assert_eq!(err.to_string(), "DUPLICATE: booking already exists");
        assert_eq!(err.status, Some(409));
    }
}
