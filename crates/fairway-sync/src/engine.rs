//! # Sync Engine
//!
//! Tracks local mutations, pushes them to the remote store and pulls remote
//! changes back into the local copies.
//!
//! ## Sync Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine Flow                                │
//! │                                                                         │
//! │  track_change(c, op, data)                                              │
//! │    1. supersede: one pending change per entity                         │
//! │    2. apply to the local copy (fairway.collection.<c>)                 │
//! │    3. persist pending list, emit sync:change-pending                   │
//! │    4. online and idle → background push                                │
//! │                                                                         │
//! │  sync_all()            idle ──► syncing ──► idle (reentrant = no-op)   │
//! │    PUSH  sync_pending_changes()                                        │
//! │      due changes only (now >= nextRetryAt)                             │
//! │      ok   → remove, reconcile localId, emit sync:change-synced         │
//! │      only a localId, create not confirmed → held, no retry consumed    │
//! │      fail → retries += 1                                               │
//! │             retries <= max  → nextRetryAt = backoff + jitter           │
//! │             retries >  max  → dead letter, emit sync:change-failed     │
//! │      persist once after the pass                                       │
//! │    PULL  pull_collection(c) for every configured collection            │
//! │      query(updatedSince = last pull) → resolve per policy → store      │
//! │      last pull = time captured before the query                        │
//! │      a failing collection emits sync:error, the others continue        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//! Pending lists, dead letters, pull timestamps and local copies are only
//! touched under `state`. The push pass is serialized by `push_lock`, so a
//! background flush and `sync_all` never deliver the same change twice. No
//! lock is held across a remote call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fairway_core::{
    doc_id, push_dead_letter, resolve, set_doc_id, supersede, Collection, FailedChange,
    Operation, PendingChange, Resolution, Supersession,
};
use fairway_store::{keys, LocalStore, LocalStoreExt};

use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::now_millis;
use crate::remote::{
    ChangeKind, QueryFilter, RemoteChange, RemoteError, RemoteStore, Subscription,
    UnconfiguredRemote,
};

type LocalDocs = BTreeMap<String, Value>;

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one push pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub synced: usize,
    /// Failed and rescheduled.
    pub retried: usize,
    pub dead_lettered: usize,
    /// Not yet due for a retry.
    pub skipped: usize,
}

/// Outcome of one `sync_all` cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub push: PushReport,
    pub pulled: usize,
    pub errors: usize,
    /// The cycle did not run (offline or another cycle was active).
    pub skipped: bool,
}

/// Point-in-time view for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending: BTreeMap<Collection, usize>,
    pub failed: usize,
    pub last_sync: BTreeMap<Collection, i64>,
}

impl SyncStatus {
    pub fn pending_total(&self) -> usize {
        self.pending.values().sum()
    }
}

// =============================================================================
// Engine State
// =============================================================================

#[derive(Debug, Default)]
struct EngineState {
    pending: BTreeMap<Collection, Vec<PendingChange>>,
    failed: VecDeque<FailedChange>,
    last_sync: BTreeMap<Collection, i64>,
    /// localId → server id for entities whose create was confirmed.
    local_ids: BTreeMap<String, String>,
}

impl EngineState {
    /// True while a dead-lettered create may still assign `local_id` a server id.
    fn awaits_create(&self, local_id: &str) -> bool {
        self.failed.iter().any(|f| {
            f.change.operation == Operation::Create
                && f.change.local_id.as_deref() == Some(local_id)
        })
    }
}

struct ActiveSubscription {
    collection: Collection,
    _subscription: Subscription,
    task: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct EngineInner {
    settings: SyncSettings,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    events: EventBus,
    state: Mutex<EngineState>,
    push_lock: Mutex<()>,
    syncing: AtomicBool,
    subscriptions: StdMutex<HashMap<u64, ActiveSubscription>>,
    next_subscription: AtomicU64,
}

/// Clears the `syncing` flag when the cycle ends, including on early return.
struct SyncingGuard<'a>(&'a AtomicBool);

impl<'a> SyncingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SyncingGuard(flag))
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Delivery {
    Delivered(Option<Value>),
    Failed(RemoteError),
    /// Addressed by localId only; waits for its create to be confirmed.
    Held,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Offline-first sync engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("collections", &self.inner.settings.collections)
            .field("policy", &self.inner.settings.conflict_policy)
            .field("syncing", &self.is_syncing())
            .finish()
    }
}

impl SyncEngine {
    pub fn builder(settings: SyncSettings) -> SyncEngineBuilder {
        SyncEngineBuilder::new(settings)
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Change Tracking
    // =========================================================================

    /// Records a local mutation and returns the id of the pending change.
    ///
    /// A create without `data.id` or `local_id` gets a generated `local_id`.
    /// An update or delete may address its entity by `local_id` alone; once
    /// the create is confirmed the server id is filled in. A delete of an
    /// entity whose create never reached the remote cancels both.
    /// When online and idle, a push is started in the background.
    pub async fn track_change(
        &self,
        collection: &Collection,
        operation: Operation,
        data: Value,
        local_id: Option<String>,
    ) -> SyncResult<String> {
        let id = self.track_inner(collection, operation, data, local_id).await?;
        self.flush_in_background();
        Ok(id)
    }

    async fn track_inner(
        &self,
        collection: &Collection,
        operation: Operation,
        data: Value,
        local_id: Option<String>,
    ) -> SyncResult<String> {
        self.ensure_known(collection)?;

        let local_id = match local_id {
            None if operation == Operation::Create && doc_id(&data).is_none() => {
                Some(uuid::Uuid::new_v4().to_string())
            }
            other => other,
        };
        let mut change = PendingChange::new(collection.clone(), operation, data, local_id, now_millis());
        change.validate()?;

        let outcome = {
            let mut state = self.inner.state.lock().await;
            if change.target_id().is_none() {
                let known = change
                    .local_id
                    .as_ref()
                    .and_then(|local| state.local_ids.get(local))
                    .cloned();
                if let Some(server_id) = known {
                    set_doc_id(&mut change.data, &server_id);
                }
            }
            let list = state.pending.entry(collection.clone()).or_default();
            let outcome = supersede(list, change.clone());
            if !matches!(outcome, Supersession::KeptDelete { .. }) {
                self.apply_local(&change)?;
            }
            self.persist_pending(&state)?;
            outcome
        };

        match outcome {
            Supersession::KeptDelete { ref id } => {
                debug!(%collection, change_id = %id, "Pending delete kept, change discarded");
            }
            Supersession::Cancelled { ref superseded, .. } => {
                debug!(%collection, change_id = %superseded, "Unsent create cancelled by delete");
            }
            ref other => {
                debug!(%collection, change_id = %other.change_id(), %operation, "Change tracked");
                self.inner.events.emit(SyncEvent::ChangePending {
                    collection: collection.clone(),
                    change_id: other.change_id().to_string(),
                    operation,
                });
            }
        }
        Ok(outcome.change_id().to_string())
    }

    fn flush_in_background(&self) {
        if !self.inner.network.is_online() || self.is_syncing() {
            return;
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.sync_pending_changes().await {
                warn!(error = %e, "Background push failed");
            }
        });
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Delivers every due pending change once.
    pub async fn sync_pending_changes(&self) -> SyncResult<PushReport> {
        let _push = self.inner.push_lock.lock().await;
        let mut report = PushReport::default();

        if !self.inner.network.is_online() {
            debug!("Offline, push skipped");
            return Ok(report);
        }

        let now = now_millis();
        let due: Vec<PendingChange> = {
            let state = self.inner.state.lock().await;
            let mut due = Vec::new();
            for change in state.pending.values().flatten() {
                if change.is_due(now) {
                    due.push(change.clone());
                } else {
                    report.skipped += 1;
                }
            }
            due
        };
        if due.is_empty() {
            return Ok(report);
        }
        info!(count = due.len(), skipped = report.skipped, "Pushing pending changes");

        for change in due {
            let delivery = if change.target_id().is_none() && change.operation.requires_id() {
                let state = self.inner.state.lock().await;
                match change.local_id {
                    Some(ref local) if state.awaits_create(local) => Delivery::Held,
                    _ => Delivery::Failed(RemoteError::Rejected(format!(
                        "{} has no server id to address",
                        change.operation
                    ))),
                }
            } else {
                self.deliver(&change).await
            };

            let mut state = self.inner.state.lock().await;
            match delivery {
                Delivery::Held => {
                    report.skipped += 1;
                    debug!(collection = %change.collection, change_id = %change.id, "Waiting for create");
                }
                Delivery::Delivered(stored) => {
                    let was_pending = remove_change(&mut state, &change);
                    if change.operation == Operation::Create {
                        if let Some(ref doc) = stored {
                            if let Err(e) = self.reconcile(&mut state, &change, doc, was_pending) {
                                error!(
                                    collection = %change.collection,
                                    change_id = %change.id,
                                    error = %e,
                                    "Local id reconciliation failed"
                                );
                            }
                        }
                    }
                    report.synced += 1;
                    debug!(collection = %change.collection, change_id = %change.id, "Change synced");
                    self.inner.events.emit(SyncEvent::ChangeSynced {
                        collection: change.collection.clone(),
                        change_id: change.id.clone(),
                        operation: change.operation,
                    });
                }
                Delivery::Failed(err) => {
                    if self.record_failure(&mut state, &change, &err) {
                        report.dead_lettered += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        let state = self.inner.state.lock().await;
        self.persist_pending(&state)?;
        self.persist_failed(&state)?;
        self.inner.store.save_json(keys::LOCAL_IDS, &state.local_ids)?;
        info!(
            synced = report.synced,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "Push pass complete"
        );
        Ok(report)
    }

    async fn deliver(&self, change: &PendingChange) -> Delivery {
        if let Err(e) = change.validate() {
            return Delivery::Failed(RemoteError::Rejected(e.to_string()));
        }
        let remote = &self.inner.remote;
        let collection = &change.collection;

        let result = match (change.operation, change.target_id()) {
            (Operation::Create, _) => remote.add(collection, change.data.clone()).await.map(Some),
            (Operation::Update, Some(id)) => remote
                .update(collection, &id, change.data.clone())
                .await
                .map(|_| None),
            (Operation::Delete, Some(id)) => match remote.delete(collection, &id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            (op, None) => Err(RemoteError::Rejected(format!("{op} has no server id to address"))),
        };

        match result {
            Ok(stored) => Delivery::Delivered(stored),
            Err(e) => Delivery::Failed(e),
        }
    }

    /// Reschedules or dead-letters a failed change. Returns true when
    /// dead-lettered.
    fn record_failure(
        &self,
        state: &mut EngineState,
        change: &PendingChange,
        err: &RemoteError,
    ) -> bool {
        let settings = &self.inner.settings;
        let Some(list) = state.pending.get_mut(&change.collection) else {
            return false;
        };
        // Superseded while in flight: the newer change keeps its own schedule.
        let Some(index) = list.iter().position(|c| c.id == change.id) else {
            return false;
        };

        let entry = &mut list[index];
        entry.retries += 1;
        entry.last_error = Some(err.to_string());

        if entry.retries > settings.max_retries {
            let dead = list.remove(index);
            error!(
                collection = %dead.collection,
                change_id = %dead.id,
                retries = dead.retries,
                error = %err,
                "Change dead-lettered"
            );
            let failed = FailedChange {
                change: dead,
                failed_at: now_millis(),
            };
            push_dead_letter(&mut state.failed, failed.clone(), settings.dead_letter_limit);
            self.inner.events.emit(SyncEvent::ChangeFailed { failed });
            return true;
        }

        let now = now_millis();
        let retry_at = settings
            .retry_policy()
            .next_retry_at(now, entry.retries, jitter_sample());
        entry.next_retry_at = Some(retry_at);
        warn!(
            collection = %entry.collection,
            change_id = %entry.id,
            retries = entry.retries,
            retry_in_ms = retry_at - now,
            error = %err,
            "Delivery failed, retry scheduled"
        );
        false
    }

    /// Moves a created entity from its local key to the server id and points
    /// still-pending follow-ups at the server id.
    ///
    /// `was_pending` is false when the create was superseded while in flight.
    /// If that happened through a delete, the entity now exists remotely but
    /// not locally, so a delete by server id is queued.
    fn reconcile(
        &self,
        state: &mut EngineState,
        change: &PendingChange,
        stored: &Value,
        was_pending: bool,
    ) -> SyncResult<()> {
        let Some(key) = change.entity_key() else {
            return Ok(());
        };
        let server_id = doc_id(stored).unwrap_or_else(|| key.clone());
        if let Some(ref local_id) = change.local_id {
            state.local_ids.insert(local_id.clone(), server_id.clone());
        }

        let mut still_pending = false;
        if let Some(list) = state.pending.get_mut(&change.collection) {
            for pending in list.iter_mut().filter(|p| p.same_entity(change)) {
                set_doc_id(&mut pending.data, &server_id);
                if pending.operation == Operation::Create {
                    pending.operation = Operation::Update;
                }
                still_pending = true;
            }
        }

        let mut docs = self.load_docs(&change.collection)?;
        let local = docs.remove(key.as_str());
        if local.is_none() && !was_pending && !still_pending {
            let mut delete = PendingChange::new(
                change.collection.clone(),
                Operation::Delete,
                Value::Object(Default::default()),
                change.local_id.clone(),
                now_millis(),
            );
            set_doc_id(&mut delete.data, &server_id);
            info!(collection = %change.collection, %key, %server_id, "Deleted while in flight, queueing remote delete");
            supersede(state.pending.entry(change.collection.clone()).or_default(), delete);
            return Ok(());
        }
        let doc = match local {
            // Newer local edits are still on their way; keep them.
            Some(mut local) if still_pending => {
                set_doc_id(&mut local, &server_id);
                local
            }
            _ => stored.clone(),
        };
        docs.insert(server_id.clone(), doc);
        self.save_docs(&change.collection, &docs)?;

        debug!(collection = %change.collection, %key, %server_id, "Local id reconciled");
        Ok(())
    }

    // =========================================================================
    // Full Cycle / Pull
    // =========================================================================

    /// Push, then pull every configured collection. A call while another
    /// cycle is running returns immediately with `skipped` set.
    pub async fn sync_all(&self) -> SyncResult<SyncReport> {
        let Some(_syncing) = SyncingGuard::acquire(&self.inner.syncing) else {
            debug!("Sync already in progress");
            return Ok(SyncReport {
                skipped: true,
                ..Default::default()
            });
        };
        if !self.inner.network.is_online() {
            debug!("Offline, sync skipped");
            return Ok(SyncReport {
                skipped: true,
                ..Default::default()
            });
        }

        info!("Sync started");
        self.inner.events.emit(SyncEvent::SyncStarted);
        let mut report = SyncReport::default();

        match self.sync_pending_changes().await {
            Ok(push) => report.push = push,
            Err(e) => {
                report.errors += 1;
                error!(error = %e, "Push failed");
                self.inner.events.emit(SyncEvent::SyncError {
                    collection: None,
                    message: e.to_string(),
                });
            }
        }

        for collection in self.inner.settings.collections.clone() {
            match self.pull_collection(&collection).await {
                Ok(applied) => report.pulled += applied,
                Err(e) => {
                    report.errors += 1;
                    warn!(%collection, error = %e, "Pull failed");
                    self.inner.events.emit(SyncEvent::SyncError {
                        collection: Some(collection.clone()),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            pushed = report.push.synced,
            pulled = report.pulled,
            errors = report.errors,
            "Sync completed"
        );
        self.inner.events.emit(SyncEvent::SyncCompleted {
            pushed: report.push.synced,
            pulled: report.pulled,
            errors: report.errors,
        });
        Ok(report)
    }

    /// Pulls documents changed since the last pull and merges them into the
    /// local copy. Returns how many documents were written locally.
    pub async fn pull_collection(&self, collection: &Collection) -> SyncResult<usize> {
        self.ensure_known(collection)?;

        let since = self.inner.state.lock().await.last_sync.get(collection).copied();
        let started = now_millis();
        let docs = self
            .inner
            .remote
            .query(collection, QueryFilter { updated_since: since })
            .await?;

        let mut state = self.inner.state.lock().await;
        let mut local = self.load_docs(collection)?;
        let mut applied = 0;
        for doc in docs {
            let Some(id) = doc_id(&doc) else {
                warn!(%collection, "Remote document without id ignored");
                continue;
            };
            if self.resolve_into(collection, &mut local, id, &doc) {
                applied += 1;
            }
        }
        self.save_docs(collection, &local)?;

        state.last_sync.insert(collection.clone(), started);
        self.inner.store.save_json(keys::LAST_SYNC, &state.last_sync)?;

        debug!(%collection, applied, since = ?since, "Collection pulled");
        Ok(applied)
    }

    /// Applies the configured conflict policy for one remote document.
    /// Returns true when the local copy was written.
    fn resolve_into(
        &self,
        collection: &Collection,
        local: &mut LocalDocs,
        id: String,
        remote: &Value,
    ) -> bool {
        match resolve(self.inner.settings.conflict_policy, local.get(&id), remote) {
            Resolution::Apply(doc) => {
                local.insert(id, doc);
                true
            }
            Resolution::KeepLocal => false,
            Resolution::Conflict { local, remote } => {
                info!(%collection, %id, "Conflict left for manual resolution");
                self.inner.events.emit(SyncEvent::Conflict {
                    collection: collection.clone(),
                    id,
                    local,
                    remote,
                });
                false
            }
        }
    }

    // =========================================================================
    // Live Feeds
    // =========================================================================

    /// Opens a live feed on `collection`. Every change is merged locally,
    /// announced as `sync:realtime-change` and handed to `callback`.
    /// Returns the subscription id for [`SyncEngine::unsubscribe`].
    pub fn subscribe_to_collection<F>(&self, collection: &Collection, callback: F) -> SyncResult<u64>
    where
        F: Fn(&RemoteChange) + Send + 'static,
    {
        self.ensure_known(collection)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<RemoteChange>();
        let subscription = self.inner.remote.subscribe(collection, tx)?;

        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let feed_collection = collection.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let engine = SyncEngine { inner };
                if let Err(e) = engine.apply_remote_change(&feed_collection, &change).await {
                    warn!(collection = %feed_collection, error = %e, "Failed to apply realtime change");
                }
                callback(&change);
            }
        });

        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscriptions().insert(
            id,
            ActiveSubscription {
                collection: collection.clone(),
                _subscription: subscription,
                task,
            },
        );
        info!(%collection, subscription = id, "Subscribed to collection");
        Ok(id)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscriptions().remove(&id);
        if let Some(ref active) = removed {
            info!(collection = %active.collection, subscription = id, "Unsubscribed");
        }
        removed.is_some()
    }

    pub fn unsubscribe_all(&self) -> usize {
        let drained: Vec<_> = self.subscriptions().drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "All subscriptions closed");
        }
        drained.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions().len()
    }

    /// Tears down every live feed.
    pub fn destroy(&self) {
        self.unsubscribe_all();
    }

    async fn apply_remote_change(&self, collection: &Collection, change: &RemoteChange) -> SyncResult<()> {
        {
            let _state = self.inner.state.lock().await;
            let mut local = self.load_docs(collection)?;
            let changed = match (change.kind, &change.doc) {
                (ChangeKind::Removed, _) => local.remove(&change.id).is_some(),
                (_, Some(doc)) => self.resolve_into(collection, &mut local, change.id.clone(), doc),
                (_, None) => false,
            };
            if changed {
                self.save_docs(collection, &local)?;
            }
        }
        self.inner.events.emit(SyncEvent::RealtimeChange {
            collection: collection.clone(),
            change: change.clone(),
        });
        Ok(())
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<u64, ActiveSubscription>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Local Data
    // =========================================================================

    /// Local documents of a collection.
    pub async fn local_documents(&self, collection: &Collection) -> SyncResult<Vec<Value>> {
        self.ensure_known(collection)?;
        let _state = self.inner.state.lock().await;
        Ok(self.load_docs(collection)?.into_values().collect())
    }

    /// Snapshot of the local copies of `collections` (all configured when `None`).
    pub async fn export_data(
        &self,
        collections: Option<&[Collection]>,
    ) -> SyncResult<BTreeMap<Collection, Vec<Value>>> {
        let names = collections.unwrap_or(self.inner.settings.collections.as_slice());
        let _state = self.inner.state.lock().await;

        let mut export = BTreeMap::new();
        for collection in names {
            self.ensure_known(collection)?;
            let docs = self.load_docs(collection)?;
            export.insert(collection.clone(), docs.into_values().collect());
        }
        Ok(export)
    }

    /// Loads documents and re-tracks each one so it reaches the remote store.
    ///
    /// Without `merge`, the local copies of the imported collections are
    /// cleared first. Records with an `id` become updates, the rest creates.
    /// Returns the number of tracked records.
    pub async fn import_data(
        &self,
        data: BTreeMap<Collection, Vec<Value>>,
        merge: bool,
    ) -> SyncResult<usize> {
        for collection in data.keys() {
            self.ensure_known(collection)?;
        }

        if !merge {
            let _state = self.inner.state.lock().await;
            for collection in data.keys() {
                self.inner.store.remove(&keys::collection(collection))?;
            }
        }

        let mut tracked = 0;
        for (collection, records) in data {
            for record in records {
                let operation = if doc_id(&record).is_some() {
                    Operation::Update
                } else {
                    Operation::Create
                };
                self.track_inner(&collection, operation, record, None).await?;
                tracked += 1;
            }
        }

        info!(tracked, merge, "Data imported");
        self.flush_in_background();
        Ok(tracked)
    }

    fn apply_local(&self, change: &PendingChange) -> SyncResult<()> {
        let Some(key) = change.entity_key() else {
            return Ok(());
        };
        let mut docs = self.load_docs(&change.collection)?;
        match change.operation {
            Operation::Delete => {
                docs.remove(&key);
            }
            Operation::Create | Operation::Update => {
                let doc = docs.entry(key).or_insert_with(|| Value::Object(Default::default()));
                match (doc, &change.data) {
                    (Value::Object(existing), Value::Object(fields)) => {
                        for (field, value) in fields {
                            existing.insert(field.clone(), value.clone());
                        }
                    }
                    (doc, data) => *doc = data.clone(),
                }
            }
        }
        self.save_docs(&change.collection, &docs)
    }

    fn load_docs(&self, collection: &Collection) -> SyncResult<LocalDocs> {
        Ok(self
            .inner
            .store
            .load_json(&keys::collection(collection))?
            .unwrap_or_default())
    }

    fn save_docs(&self, collection: &Collection, docs: &LocalDocs) -> SyncResult<()> {
        Ok(self.inner.store.save_json(&keys::collection(collection), docs)?)
    }

    // =========================================================================
    // Status / Dead Letters
    // =========================================================================

    pub async fn status(&self) -> SyncStatus {
        let state = self.inner.state.lock().await;
        SyncStatus {
            online: self.inner.network.is_online(),
            syncing: self.is_syncing(),
            pending: state
                .pending
                .iter()
                .map(|(c, list)| (c.clone(), list.len()))
                .filter(|(_, n)| *n > 0)
                .collect(),
            failed: state.failed.len(),
            last_sync: state.last_sync.clone(),
        }
    }

    /// Pending changes of one collection, or of all when `None`.
    pub async fn pending_changes(&self, collection: Option<&Collection>) -> Vec<PendingChange> {
        let state = self.inner.state.lock().await;
        match collection {
            Some(c) => state.pending.get(c).cloned().unwrap_or_default(),
            None => state.pending.values().flatten().cloned().collect(),
        }
    }

    /// Dead-lettered changes, oldest first.
    pub async fn failed_changes(&self) -> Vec<FailedChange> {
        self.inner.state.lock().await.failed.iter().cloned().collect()
    }

    /// Moves a dead-lettered change back to pending with a fresh retry budget.
    pub async fn retry_failed(&self, change_id: &str) -> SyncResult<String> {
        let (collection, operation, outcome) = {
            let mut state = self.inner.state.lock().await;
            let index = state
                .failed
                .iter()
                .position(|f| f.change.id == change_id)
                .ok_or_else(|| SyncError::FailedChangeNotFound(change_id.to_string()))?;
            let Some(failed) = state.failed.remove(index) else {
                return Err(SyncError::FailedChangeNotFound(change_id.to_string()));
            };

            let mut change = failed.change;
            change.retries = 0;
            change.next_retry_at = None;
            change.last_error = None;
            let collection = change.collection.clone();
            let operation = change.operation;

            let list = state.pending.entry(collection.clone()).or_default();
            let outcome = match take_held_follow_up(list, &change) {
                // Edits made while the create was parked ride along with it.
                Some(follow_up) if follow_up.operation == Operation::Update => {
                    merge_fields(&mut change.data, &follow_up.data);
                    supersede(list, change)
                }
                Some(follow_up) => Supersession::Cancelled {
                    id: follow_up.id,
                    superseded: change.id,
                },
                None => supersede(list, change),
            };
            self.persist_pending(&state)?;
            self.persist_failed(&state)?;
            (collection, operation, outcome)
        };

        if let Supersession::Cancelled { ref id, .. } = outcome {
            info!(%collection, change_id, delete_id = %id, "Requeued create cancelled by held delete");
            return Ok(id.clone());
        }
        info!(%collection, change_id, "Failed change requeued");
        self.inner.events.emit(SyncEvent::ChangePending {
            collection,
            change_id: outcome.change_id().to_string(),
            operation,
        });
        self.flush_in_background();
        Ok(outcome.change_id().to_string())
    }

    /// Drops every dead-lettered change. Returns how many.
    pub async fn clear_failed(&self) -> SyncResult<usize> {
        let mut state = self.inner.state.lock().await;
        let cleared = state.failed.len();
        state.failed.clear();
        self.persist_failed(&state)?;
        Ok(cleared)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn ensure_known(&self, collection: &Collection) -> SyncResult<()> {
        if self.inner.settings.collections.contains(collection) {
            Ok(())
        } else {
            Err(SyncError::UnknownCollection(collection.to_string()))
        }
    }

    fn persist_pending(&self, state: &EngineState) -> SyncResult<()> {
        Ok(self.inner.store.save_json(keys::PENDING_CHANGES, &state.pending)?)
    }

    fn persist_failed(&self, state: &EngineState) -> SyncResult<()> {
        Ok(self.inner.store.save_json(keys::FAILED_CHANGES, &state.failed)?)
    }
}

/// Removes `change` by id. False when it was superseded in the meantime.
fn remove_change(state: &mut EngineState, change: &PendingChange) -> bool {
    let Some(list) = state.pending.get_mut(&change.collection) else {
        return false;
    };
    let before = list.len();
    list.retain(|c| c.id != change.id);
    list.len() != before
}

/// Removes the held update or delete that waits on `create`, if any.
fn take_held_follow_up(list: &mut Vec<PendingChange>, create: &PendingChange) -> Option<PendingChange> {
    if create.operation != Operation::Create {
        return None;
    }
    let index = list
        .iter()
        .position(|p| p.target_id().is_none() && p.same_entity(create))?;
    Some(list.remove(index))
}

fn merge_fields(target: &mut Value, fields: &Value) {
    if let (Value::Object(target), Value::Object(fields)) = (target, fields) {
        for (field, value) in fields {
            target.insert(field.clone(), value.clone());
        }
    }
}

fn jitter_sample() -> f64 {
    rand::thread_rng().gen::<f64>()
}

// =============================================================================
// Builder
// =============================================================================

pub struct SyncEngineBuilder {
    settings: SyncSettings,
    store: Option<Arc<dyn LocalStore>>,
    remote: Option<Arc<dyn RemoteStore>>,
    network: Option<NetworkMonitor>,
    events: Option<EventBus>,
}

impl SyncEngineBuilder {
    pub fn new(settings: SyncSettings) -> Self {
        SyncEngineBuilder {
            settings,
            store: None,
            remote: None,
            network: None,
            events: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Without a remote store, changes stay pending and pulls fail.
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn network(mut self, network: NetworkMonitor) -> Self {
        self.network = Some(network);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Builds the engine and restores persisted state.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let store = self
            .store
            .ok_or_else(|| SyncError::InvalidConfig("Local store required".into()))?;
        let remote = self.remote.unwrap_or_else(|| {
            warn!("No remote store configured, changes will stay pending");
            Arc::new(UnconfiguredRemote)
        });
        let events = self.events.unwrap_or_default();
        let network = self
            .network
            .unwrap_or_else(|| NetworkMonitor::new(true, events.clone()));

        let pending: BTreeMap<Collection, Vec<PendingChange>> =
            store.load_json(keys::PENDING_CHANGES)?.unwrap_or_default();
        let failed: VecDeque<FailedChange> =
            store.load_json(keys::FAILED_CHANGES)?.unwrap_or_default();
        let last_sync: BTreeMap<Collection, i64> =
            store.load_json(keys::LAST_SYNC)?.unwrap_or_default();
        let local_ids: BTreeMap<String, String> =
            store.load_json(keys::LOCAL_IDS)?.unwrap_or_default();

        info!(
            pending = pending.values().map(Vec::len).sum::<usize>(),
            failed = failed.len(),
            collections = self.settings.collections.len(),
            "Sync engine state restored"
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                settings: self.settings,
                store,
                remote,
                network,
                events,
                state: Mutex::new(EngineState {
                    pending,
                    failed,
                    last_sync,
                    local_ids,
                }),
                push_lock: Mutex::new(()),
                syncing: AtomicBool::new(false),
                subscriptions: StdMutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(0),
            }),
        })
    }
}
