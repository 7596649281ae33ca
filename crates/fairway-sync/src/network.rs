//! Online/offline state.
//!
//! The host application reports connectivity through [`NetworkMonitor::set_online`];
//! transitions are broadcast as `network:online` / `network:offline` events and
//! through a `watch` channel the agent listens on.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::events::{EventBus, SyncEvent};

/// Shared connectivity flag.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<bool>>,
    events: EventBus,
}

impl NetworkMonitor {
    pub fn new(online: bool, events: EventBus) -> Self {
        let (state, _) = watch::channel(online);
        NetworkMonitor {
            state: Arc::new(state),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records the current connectivity. Emits an event only on a transition.
    pub fn set_online(&self, online: bool) {
        let previous = self.state.send_replace(online);
        if previous == online {
            return;
        }
        if online {
            info!("Network online");
            self.events.emit(SyncEvent::Online);
        } else {
            info!("Network offline");
            self.events.emit(SyncEvent::Offline);
        }
    }

    /// Receiver notified on every change.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_emit_once() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let network = NetworkMonitor::new(true, events);

        network.set_online(true);
        network.set_online(false);
        network.set_online(false);
        network.set_online(true);

        assert_eq!(rx.recv().await, Some(SyncEvent::Offline));
        assert_eq!(rx.recv().await, Some(SyncEvent::Online));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watchers_see_changes() {
        let network = NetworkMonitor::new(false, EventBus::new());
        let mut watcher = network.watch();

        network.set_online(true);
        watcher.changed().await.unwrap();
        assert!(*watcher.borrow());
        assert!(network.is_online());
    }
}
