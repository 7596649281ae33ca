//! # fairway-store: Durable Local Store
//!
//! The synchronous key → string store behind the sync layer. Everything the
//! engines must survive a restart with is written here, one whole value per
//! key.
//!
//! ## Modules
//! - [`keys`] - Stable persisted key namespace
//! - [`memory`] - `MemoryStore`
//! - [`file`] - `FileStore`
//! - [`error`] - `StoreError`
//!
//! ## Usage
//! ```rust
//! use fairway_store::{LocalStore, LocalStoreExt, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.save_json("fairway.lastSyncTimes", &vec![1, 2, 3]).unwrap();
//! let back: Option<Vec<i32>> = store.load_json("fairway.lastSyncTimes").unwrap();
//! assert_eq!(back, Some(vec![1, 2, 3]));
//! ```

pub mod error;
pub mod file;
pub mod keys;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Synchronous key → string store.
///
/// Implementations must make `set` all-or-nothing: a reader sees either the
/// previous value or the new one.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Typed JSON access on top of any [`LocalStore`].
pub trait LocalStoreExt: LocalStore {
    /// Loads and parses a value. A missing key is `Ok(None)`.
    fn load_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Serializes and stores a value, replacing any previous one.
    fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

impl<S: LocalStore + ?Sized> LocalStoreExt for S {}

/// Rejects keys that cannot be used as a single file name.
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
