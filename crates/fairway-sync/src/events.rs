//! # Sync Events
//!
//! Notifications for the UI and business layers.
//!
//! ## Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          EventBus Fan-out                               │
//! │                                                                         │
//! │   ApiClient ─┐                         ┌─► subscriber A (unbounded rx)  │
//! │   SyncEngine ├──► EventBus::emit() ────┼─► subscriber B (unbounded rx)  │
//! │   Network   ─┘                         └─► subscriber C (unbounded rx)  │
//! │                                                                         │
//! │  • Each subscriber owns its own channel: a slow reader never blocks    │
//! │    the engines and never loses events.                                 │
//! │  • Subscribers see every event emitted after they subscribed.          │
//! │  • Dropped receivers are pruned on the next emit.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Event Names
//! | Event | Name |
//! |---|---|
//! | `Queued` | `queue:queued` |
//! | `QueueProcessingStarted` | `queue:processing-started` |
//! | `QueueProcessingCompleted` | `queue:processing-completed` |
//! | `ChangePending` | `sync:change-pending` |
//! | `ChangeSynced` | `sync:change-synced` |
//! | `ChangeFailed` | `sync:change-failed` |
//! | `SyncStarted` | `sync:started` |
//! | `SyncCompleted` | `sync:completed` |
//! | `SyncError` | `sync:error` |
//! | `Conflict` | `sync:conflict` |
//! | `RealtimeChange` | `sync:realtime-change` |
//! | `Online` / `Offline` | `network:online` / `network:offline` |

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use fairway_core::{Collection, FailedChange, HttpMethod, Operation};

use crate::remote::RemoteChange;

/// Everything the engines report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A request was stored in the offline queue.
    Queued {
        request_id: String,
        method: HttpMethod,
        url: String,
    },
    QueueProcessingStarted {
        pending: usize,
    },
    QueueProcessingCompleted {
        processed: usize,
        remaining: usize,
    },
    ChangePending {
        collection: Collection,
        change_id: String,
        operation: Operation,
    },
    ChangeSynced {
        collection: Collection,
        change_id: String,
        operation: Operation,
    },
    /// Terminal: the change was dead-lettered.
    ChangeFailed {
        failed: FailedChange,
    },
    SyncStarted,
    SyncCompleted {
        pushed: usize,
        pulled: usize,
        errors: usize,
    },
    SyncError {
        collection: Option<Collection>,
        message: String,
    },
    /// Manual policy: both versions are kept for an external resolver.
    Conflict {
        collection: Collection,
        id: String,
        local: Value,
        remote: Value,
    },
    RealtimeChange {
        collection: Collection,
        change: RemoteChange,
    },
    Online,
    Offline,
}

impl SyncEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Queued { .. } => "queue:queued",
            SyncEvent::QueueProcessingStarted { .. } => "queue:processing-started",
            SyncEvent::QueueProcessingCompleted { .. } => "queue:processing-completed",
            SyncEvent::ChangePending { .. } => "sync:change-pending",
            SyncEvent::ChangeSynced { .. } => "sync:change-synced",
            SyncEvent::ChangeFailed { .. } => "sync:change-failed",
            SyncEvent::SyncStarted => "sync:started",
            SyncEvent::SyncCompleted { .. } => "sync:completed",
            SyncEvent::SyncError { .. } => "sync:error",
            SyncEvent::Conflict { .. } => "sync:conflict",
            SyncEvent::RealtimeChange { .. } => "sync:realtime-change",
            SyncEvent::Online => "network:online",
            SyncEvent::Offline => "network:offline",
        }
    }
}

/// Publish/subscribe hub shared by the engines.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. It receives every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<SyncEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(SyncEvent::SyncStarted.name(), "sync:started");
        assert_eq!(SyncEvent::Offline.name(), "network:offline");
        assert_eq!(
            SyncEvent::QueueProcessingCompleted {
                processed: 1,
                remaining: 0
            }
            .name(),
            "queue:processing-completed"
        );
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(SyncEvent::Online);
        bus.emit(SyncEvent::SyncStarted);

        assert_eq!(a.recv().await, Some(SyncEvent::Online));
        assert_eq!(a.recv().await, Some(SyncEvent::SyncStarted));
        assert_eq!(b.recv().await, Some(SyncEvent::Online));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        drop(rx);

        bus.emit(SyncEvent::Online);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_serializes_with_event_tag() {
        let json = serde_json::to_value(SyncEvent::QueueProcessingStarted { pending: 2 }).unwrap();
        assert_eq!(json["event"], "queueProcessingStarted");
        assert_eq!(json["pending"], 2);
    }
}
