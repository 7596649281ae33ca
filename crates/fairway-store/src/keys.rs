//! Persisted key namespace.
//!
//! These names are part of the on-disk format: renaming one orphans the data
//! already stored under it.

use fairway_core::Collection;

/// Offline request queue (`Vec<QueuedRequest>`).
pub const PENDING_REQUESTS: &str = "fairway.pendingRequests";

/// Pending sync changes (`collection → Vec<PendingChange>`).
pub const PENDING_CHANGES: &str = "fairway.pendingSyncChanges";

/// Dead-lettered changes (`Vec<FailedChange>`).
pub const FAILED_CHANGES: &str = "fairway.failedSyncChanges";

/// Last successful pull per collection (`collection → epoch ms`).
pub const LAST_SYNC: &str = "fairway.lastSyncTimes";

/// Server ids assigned to locally created entities (`localId → id`).
pub const LOCAL_IDS: &str = "fairway.localIdMap";

/// Local copy of a collection's documents (`key → document`).
pub fn collection(collection: &Collection) -> String {
    format!("fairway.collection.{collection}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_key() {
        let bookings = Collection::new("bookings").unwrap();
        assert_eq!(collection(&bookings), "fairway.collection.bookings");
    }
}
