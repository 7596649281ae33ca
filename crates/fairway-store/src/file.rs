//! # File Store
//!
//! One JSON file per key inside a data directory.
//!
//! ```text
//! <data_dir>/
//!   fairway.pendingRequests.json
//!   fairway.pendingSyncChanges.json
//!   fairway.failedSyncChanges.json
//!   fairway.lastSyncTimes.json
//!   fairway.collection.bookings.json
//! ```
//!
//! Writes go to `<key>.json.tmp` first and are renamed over the target, so a
//! crash mid-write leaves the previous value intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::{validate_key, LocalStore};

/// `LocalStore` persisted to a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) the data directory.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Unavailable(format!("cannot create {}: {}", dir.display(), e))
        })?;
        info!(path = ?dir, "Opened file store");
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|e| StoreError::io(key, e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(key, e))?;
        debug!(key, bytes = value.len(), "Persisted store value");
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }
}
