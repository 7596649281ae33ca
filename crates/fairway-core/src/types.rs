//! # Domain Types
//!
//! Persisted records owned by the sync layer.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Layer Types                                │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  PendingChange  │   │  FailedChange   │   │  QueuedRequest  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  PendingChange  │   │  id (UUID)      │       │
//! │  │  collection     │   │  + failedAt     │   │  method, url    │       │
//! │  │  operation      │   │                 │   │  data, options  │       │
//! │  │  data, localId  │   │  (dead letter)  │   │  queuedAt       │       │
//! │  │  retries        │   └─────────────────┘   └─────────────────┘       │
//! │  │  nextRetryAt    │                                                    │
//! │  └─────────────────┘   ┌─────────────────┐   ┌─────────────────┐       │
//! │                        │   Operation     │   │   HttpMethod    │       │
//! │  ┌─────────────────┐   │  ─────────────  │   │  ─────────────  │       │
//! │  │   Collection    │   │  create         │   │  GET  POST      │       │
//! │  │  "bookings"     │   │  update         │   │  PUT  PATCH     │       │
//! │  │  "customers"    │   │  delete         │   │  DELETE         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All timestamps are epoch milliseconds supplied by the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;
use uuid::Uuid;

use crate::document::doc_id;
use crate::error::{CoreError, CoreResult};

// =============================================================================
// Collection
// =============================================================================

/// Name of a logical document set (e.g. `bookings`, `customers`).
///
/// Names are validated once at construction; the engine additionally rejects
/// names that are not in its configured registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Collection(String);

impl Collection {
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if valid {
            Ok(Collection(name))
        } else {
            Err(CoreError::InvalidCollection(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Collection {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Collection::new(value)
    }
}

impl From<Collection> for String {
    fn from(value: Collection) -> Self {
        value.0
    }
}

impl std::str::FromStr for Collection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::new(s)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Operation
// =============================================================================

/// Kind of mutation carried by a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Update and delete address an existing entity and need its id.
    pub fn requires_id(&self) -> bool {
        matches!(self, Operation::Update | Operation::Delete)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

// =============================================================================
// Pending Change
// =============================================================================

/// A local mutation not yet confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: String,
    #[ts(type = "string")]
    pub collection: Collection,
    pub operation: Operation,
    /// Payload; update/delete payloads carry the target's `id`.
    #[ts(type = "unknown")]
    pub data: Value,
    /// Client-assigned id used before the server id is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingChange {
    pub fn new(
        collection: Collection,
        operation: Operation,
        data: Value,
        local_id: Option<String>,
        now: i64,
    ) -> Self {
        PendingChange {
            id: Uuid::new_v4().to_string(),
            collection,
            operation,
            data,
            local_id,
            timestamp: now,
            retries: 0,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// Server id of the target entity, if the payload carries one.
    pub fn target_id(&self) -> Option<String> {
        doc_id(&self.data)
    }

    /// Key the local copy of the entity is stored under.
    pub fn entity_key(&self) -> Option<String> {
        self.target_id().or_else(|| self.local_id.clone())
    }

    /// True when both changes address the same entity (by localId or id).
    pub fn same_entity(&self, other: &PendingChange) -> bool {
        if let (Some(a), Some(b)) = (&self.local_id, &other.local_id) {
            if a == b {
                return true;
            }
        }
        matches!((self.target_id(), other.target_id()), (Some(a), Some(b)) if a == b)
    }

    /// True when a retry may be attempted at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.next_retry_at.map_or(true, |at| now >= at)
    }

    /// Checks the payload shape. An update or delete must address its entity
    /// by `data.id` or, before the server id is known, by `local_id`.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.data.is_object() {
            return Err(CoreError::InvalidChange {
                reason: "data must be a JSON object".into(),
            });
        }
        if self.operation.requires_id() && self.entity_key().is_none() {
            return Err(CoreError::InvalidChange {
                reason: format!("{} requires data.id or localId", self.operation),
            });
        }
        Ok(())
    }
}

/// A change that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct FailedChange {
    #[serde(flatten)]
    pub change: PendingChange,
    pub failed_at: i64,
}

// =============================================================================
// HTTP Request Types
// =============================================================================

/// Methods accepted by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn is_get(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(CoreError::InvalidMethod(s.to_string())),
        }
    }
}

/// Cache lifetime class for GET responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CacheTtl {
    Short,
    #[default]
    Medium,
    Long,
}

/// Per-call request options. Numeric limits are clamped by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    pub timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    /// Use the response cache for GET.
    pub cache: bool,
    /// Skip the cache lookup (the response is still stored).
    pub bypass_cache: bool,
    pub cache_ttl: CacheTtl,
    /// URL substring whose cache entries are dropped after a successful mutation.
    pub invalidate: Option<String>,
    /// Allow queueing while offline or after a network-class failure.
    pub queue: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            timeout_ms: None,
            retry_attempts: None,
            retry_delay_ms: None,
            cache: true,
            bypass_cache: false,
            cache_ttl: CacheTtl::default(),
            invalidate: None,
            queue: true,
        }
    }
}

impl RequestOptions {
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = Some(ms);
        self
    }

    pub fn ttl(mut self, ttl: CacheTtl) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn invalidating(mut self, pattern: impl Into<String>) -> Self {
        self.invalidate = Some(pattern.into());
        self
    }

    pub fn without_queue(mut self) -> Self {
        self.queue = false;
        self
    }
}

/// A deferred non-GET request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: String,
    pub method: HttpMethod,
    pub url: String,
    #[ts(type = "unknown")]
    pub data: Option<Value>,
    #[serde(default)]
    pub options: RequestOptions,
    pub queued_at: i64,
}

impl QueuedRequest {
    pub fn new(
        method: HttpMethod,
        url: impl Into<String>,
        data: Option<Value>,
        options: RequestOptions,
        now: i64,
    ) -> Self {
        QueuedRequest {
            id: Uuid::new_v4().to_string(),
            method,
            url: url.into(),
            data,
            options,
            queued_at: now,
        }
    }

    /// True when the entry is older than the retention window.
    pub fn is_expired(&self, now: i64, retention_ms: i64) -> bool {
        now - self.queued_at > retention_ms
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bookings() -> Collection {
        Collection::new("bookings").unwrap()
    }

    #[test]
    fn test_collection_validation() {
        assert!(Collection::new("bookings").is_ok());
        assert!(Collection::new("gift_cards").is_ok());
        assert!(Collection::new("").is_err());
        assert!(Collection::new("Bookings").is_err());
        assert!(Collection::new("tabs/1").is_err());
    }

    #[test]
    fn test_collection_serde_validates() {
        let c: Collection = serde_json::from_str("\"customers\"").unwrap();
        assert_eq!(c.as_str(), "customers");
        assert!(serde_json::from_str::<Collection>("\"bad name\"").is_err());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("PATCH".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("HEAD".parse::<HttpMethod>().is_err());
        assert!("".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_same_entity_by_id_or_local_id() {
        let a = PendingChange::new(bookings(), Operation::Update, json!({"id": 5}), None, 0);
        let b = PendingChange::new(bookings(), Operation::Delete, json!({"id": "5"}), None, 1);
        assert!(a.same_entity(&b));

        let c = PendingChange::new(bookings(), Operation::Create, json!({}), Some("tmp-1".into()), 0);
        let d = PendingChange::new(bookings(), Operation::Update, json!({"x": 1}), Some("tmp-1".into()), 1);
        assert!(c.same_entity(&d));
        assert!(!a.same_entity(&c));
    }

    #[test]
    fn test_is_due() {
        let mut change = PendingChange::new(bookings(), Operation::Create, json!({}), None, 0);
        assert!(change.is_due(0));
        change.next_retry_at = Some(1_000);
        assert!(!change.is_due(999));
        assert!(change.is_due(1_000));
    }

    #[test]
    fn test_validate_requires_id_for_update() {
        let change = PendingChange::new(bookings(), Operation::Update, json!({"bay": 3}), None, 0);
        assert!(change.validate().is_err());
        let change = PendingChange::new(bookings(), Operation::Create, json!({"bay": 3}), None, 0);
        assert!(change.validate().is_ok());
        let change = PendingChange::new(bookings(), Operation::Create, json!("bay"), None, 0);
        assert!(change.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_local_id_for_update_and_delete() {
        let local = Some("tmp-1".to_string());
        let change = PendingChange::new(bookings(), Operation::Update, json!({"bay": 3}), local.clone(), 0);
        assert!(change.validate().is_ok());
        assert_eq!(change.target_id(), None);
        let change = PendingChange::new(bookings(), Operation::Delete, json!({}), local, 0);
        assert!(change.validate().is_ok());
    }

    #[test]
    fn test_pending_change_wire_format() {
        let change = PendingChange::new(bookings(), Operation::Delete, json!({"id": 7}), None, 42);
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["operation"], "delete");
        assert_eq!(json["collection"], "bookings");
        assert_eq!(json["timestamp"], 42);
        assert!(json.get("nextRetryAt").is_none());

        let failed = FailedChange { change, failed_at: 99 };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["failedAt"], 99);
        assert_eq!(json["operation"], "delete");
    }

    #[test]
    fn test_queued_request_expiry() {
        let req = QueuedRequest::new(HttpMethod::Post, "/api/tabs", None, RequestOptions::default(), 0);
        let day = 24 * 60 * 60 * 1000;
        assert!(!req.is_expired(day, day));
        assert!(req.is_expired(day + 1, day));
    }

    #[test]
    fn test_request_options_defaults() {
        let opts: RequestOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.cache);
        assert!(opts.queue);
        assert_eq!(opts.cache_ttl, CacheTtl::Medium);
    }
}
