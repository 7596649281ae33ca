//! # Remote Document Store
//!
//! The five operations the sync engine needs from the server side, per
//! collection: `add`, `update`, `delete`, `query` and `subscribe`.
//!
//! ## Implementations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UnconfiguredRemote   every call fails with Unavailable (default)       │
//! │  MemoryRemoteStore    in-process store, live feed via channels          │
//! │  HttpRemoteStore      REST over ApiClient, live feed via polling        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use fairway_core::{
    doc_id, set_doc_id, updated_at_millis, ApiError, Collection, ErrorCode,
    UPDATED_AT_FIELD,
};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// No remote store is configured or it cannot be reached at all.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The remote refused the payload (validation, duplicate).
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Network(_))
    }
}

impl From<ApiError> for RemoteError {
    fn from(err: ApiError) -> Self {
        match err.code {
            ErrorCode::Network => RemoteError::Network(err.message),
            ErrorCode::NotFound => RemoteError::NotFound(err.message),
            ErrorCode::Unauthorized => RemoteError::Unauthorized(err.message),
            ErrorCode::Validation | ErrorCode::Duplicate => RemoteError::Rejected(err.to_string()),
        }
    }
}

// =============================================================================
// Query / Feed Types
// =============================================================================

/// Filter for incremental pulls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Only documents whose `updatedAt` is after this (epoch ms). `None` is
    /// a full pull.
    pub updated_since: Option<i64>,
}

impl QueryFilter {
    pub fn matches(&self, doc: &Value) -> bool {
        match self.updated_since {
            Some(since) => updated_at_millis(doc).unwrap_or(0) > since,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a live change feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteChange {
    pub kind: ChangeKind,
    pub id: String,
    /// Current document; `None` for removals.
    pub doc: Option<Value>,
}

/// Live feed handle. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn noop() -> Self {
        Subscription { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// =============================================================================
// Remote Store Trait
// =============================================================================

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a document. Returns the stored document including its server id.
    async fn add(&self, collection: &Collection, doc: Value) -> Result<Value, RemoteError>;

    async fn update(&self, collection: &Collection, id: &str, doc: Value)
        -> Result<(), RemoteError>;

    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), RemoteError>;

    async fn query(
        &self,
        collection: &Collection,
        filter: QueryFilter,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Opens a live feed. Changes are sent to `sink` until the returned
    /// subscription is dropped or the receiver closes.
    fn subscribe(
        &self,
        collection: &Collection,
        sink: mpsc::UnboundedSender<RemoteChange>,
    ) -> Result<Subscription, RemoteError>;
}

// =============================================================================
// Unconfigured Remote
// =============================================================================

/// Stand-in when no remote store was injected. Changes stay pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRemote;

fn unavailable() -> RemoteError {
    RemoteError::Unavailable("no remote store configured".into())
}

#[async_trait]
impl RemoteStore for UnconfiguredRemote {
    async fn add(&self, _: &Collection, _: Value) -> Result<Value, RemoteError> {
        Err(unavailable())
    }

    async fn update(&self, _: &Collection, _: &str, _: Value) -> Result<(), RemoteError> {
        Err(unavailable())
    }

    async fn delete(&self, _: &Collection, _: &str) -> Result<(), RemoteError> {
        Err(unavailable())
    }

    async fn query(&self, _: &Collection, _: QueryFilter) -> Result<Vec<Value>, RemoteError> {
        Err(unavailable())
    }

    fn subscribe(
        &self,
        _: &Collection,
        _: mpsc::UnboundedSender<RemoteChange>,
    ) -> Result<Subscription, RemoteError> {
        Err(unavailable())
    }
}

// =============================================================================
// Memory Remote Store
// =============================================================================

type Feed = (u64, mpsc::UnboundedSender<RemoteChange>);

#[derive(Default)]
struct MemoryState {
    docs: HashMap<Collection, BTreeMap<String, Value>>,
    feeds: HashMap<Collection, Vec<Feed>>,
}

/// In-process remote store for local-only mode and tests.
///
/// Stamps `updatedAt` on every write. While marked unavailable every call
/// fails with a network error.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<MemoryState>>,
    offline: Arc<AtomicBool>,
    next_feed: Arc<AtomicU64>,
    writes: Arc<AtomicUsize>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the remote being (un)reachable.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Number of successful add/update/delete calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, collection: &Collection, id: &str) -> Option<Value> {
        self.lock().docs.get(collection)?.get(id).cloned()
    }

    pub fn len(&self, collection: &Collection) -> usize {
        self.lock().docs.get(collection).map_or(0, BTreeMap::len)
    }

    /// Writes a document as another device would, notifying live feeds.
    pub fn put(&self, collection: &Collection, doc: Value) -> Option<String> {
        let id = doc_id(&doc)?;
        self.store_doc(collection, id.clone(), doc, ChangeKind::Modified);
        Some(id)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Network("remote store unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn store_doc(&self, collection: &Collection, id: String, mut doc: Value, kind: ChangeKind) -> Value {
        if let Value::Object(ref mut map) = doc {
            map.insert(
                UPDATED_AT_FIELD.to_string(),
                Value::from(crate::now_millis()),
            );
        }
        let mut state = self.lock();
        state
            .docs
            .entry(collection.clone())
            .or_default()
            .insert(id.clone(), doc.clone());
        notify(&mut state, collection, RemoteChange {
            kind,
            id,
            doc: Some(doc.clone()),
        });
        doc
    }
}

fn notify(state: &mut MemoryState, collection: &Collection, change: RemoteChange) {
    if let Some(feeds) = state.feeds.get_mut(collection) {
        feeds.retain(|(_, tx)| tx.send(change.clone()).is_ok());
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn add(&self, collection: &Collection, mut doc: Value) -> Result<Value, RemoteError> {
        self.check_available()?;
        if !doc.is_object() {
            return Err(RemoteError::Rejected("document must be an object".into()));
        }
        let id = doc_id(&doc).unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.lock().docs.get(collection).is_some_and(|d| d.contains_key(&id)) {
            return Err(RemoteError::Rejected(format!("duplicate id {id}")));
        }
        set_doc_id(&mut doc, &id);
        let stored = self.store_doc(collection, id, doc, ChangeKind::Added);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update(&self, collection: &Collection, id: &str, doc: Value) -> Result<(), RemoteError> {
        self.check_available()?;
        let Value::Object(fields) = doc else {
            return Err(RemoteError::Rejected("document must be an object".into()));
        };
        let Some(mut current) = self.get(collection, id) else {
            return Err(RemoteError::NotFound(format!("{collection}/{id}")));
        };
        if let Value::Object(ref mut map) = current {
            map.extend(fields);
        }
        set_doc_id(&mut current, id);
        self.store_doc(collection, id.to_string(), current, ChangeKind::Modified);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), RemoteError> {
        self.check_available()?;
        let mut state = self.lock();
        let removed = state.docs.get_mut(collection).and_then(|d| d.remove(id));
        if removed.is_none() {
            return Err(RemoteError::NotFound(format!("{collection}/{id}")));
        }
        notify(&mut state, collection, RemoteChange {
            kind: ChangeKind::Removed,
            id: id.to_string(),
            doc: None,
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(
        &self,
        collection: &Collection,
        filter: QueryFilter,
    ) -> Result<Vec<Value>, RemoteError> {
        self.check_available()?;
        let state = self.lock();
        Ok(state
            .docs
            .get(collection)
            .map(|docs| docs.values().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    fn subscribe(
        &self,
        collection: &Collection,
        sink: mpsc::UnboundedSender<RemoteChange>,
    ) -> Result<Subscription, RemoteError> {
        self.check_available()?;
        let feed_id = self.next_feed.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .feeds
            .entry(collection.clone())
            .or_default()
            .push((feed_id, sink));
        debug!(%collection, feed_id, "Memory feed opened");

        let state = Arc::clone(&self.state);
        let collection = collection.clone();
        Ok(Subscription::new(move || {
            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(feeds) = state.feeds.get_mut(&collection) {
                feeds.retain(|(id, _)| *id != feed_id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bookings() -> Collection {
        Collection::new("bookings").unwrap()
    }

    #[test]
    fn test_api_error_mapping() {
        let err: RemoteError = ApiError::from_status(404, "gone").into();
        assert_eq!(err, RemoteError::NotFound("gone".into()));
        let err: RemoteError = ApiError::network("reset").into();
        assert!(err.is_retryable());
        let err: RemoteError = ApiError::from_status(409, "exists").into();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unconfigured_remote_is_unavailable() {
        let remote = UnconfiguredRemote;
        let err = remote.add(&bookings(), json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(remote.subscribe(&bookings(), tx).is_err());
    }

    #[tokio::test]
    async fn test_memory_store_crud_and_query() {
        let remote = MemoryRemoteStore::new();
        let created = remote.add(&bookings(), json!({"bay": 4})).await.unwrap();
        let id = doc_id(&created).unwrap();
        assert!(updated_at_millis(&created).is_some());

        remote.update(&bookings(), &id, json!({"bay": 5})).await.unwrap();
        assert_eq!(remote.get(&bookings(), &id).unwrap()["bay"], 5);

        let all = remote.query(&bookings(), QueryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        let none = remote
            .query(&bookings(), QueryFilter { updated_since: Some(i64::MAX) })
            .await
            .unwrap();
        assert!(none.is_empty());

        remote.delete(&bookings(), &id).await.unwrap();
        assert!(matches!(
            remote.delete(&bookings(), &id).await,
            Err(RemoteError::NotFound(_))
        ));
        assert_eq!(remote.write_count(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_memory_store_fails_with_network_error() {
        let remote = MemoryRemoteStore::new();
        remote.set_available(false);
        let err = remote.add(&bookings(), json!({})).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_feed_stops_after_unsubscribe() {
        let remote = MemoryRemoteStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = remote.subscribe(&bookings(), tx).unwrap();

        remote.put(&bookings(), json!({"id": "b1"}));
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Modified);
        assert_eq!(change.id, "b1");

        subscription.unsubscribe();
        remote.put(&bookings(), json!({"id": "b2"}));
        assert!(rx.recv().await.is_none());
    }
}
