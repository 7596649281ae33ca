//! GET response cache keyed by absolute URL.
//!
//! Bounded by an LRU: beyond the capacity the least recently used response is
//! evicted. Entries also expire after the TTL of the class they were stored
//! with; an expired entry is dropped when it is looked up or evicted.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl ResponseCache {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ResponseCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached response if it has not expired.
    pub fn get(&self, url: &str) -> Option<Value> {
        let mut entries = self.lock();
        match entries.get(url) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(url);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, url: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        if let Some((evicted, _)) = self.lock().push(url.to_string(), entry) {
            if evicted != url {
                debug!(url = %evicted, "Cached response evicted");
            }
        }
    }

    /// Drops every entry whose URL contains `pattern`. Returns how many.
    pub fn invalidate_matching(&self, pattern: &str) -> usize {
        let mut entries = self.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(url, _)| url.contains(pattern))
            .map(|(url, _)| url.clone())
            .collect();
        for url in &matching {
            entries.pop(url);
        }
        if !matching.is_empty() {
            debug!(pattern, removed = matching.len(), "Invalidated cached responses");
        }
        matching.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
