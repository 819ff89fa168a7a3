//! Data Store Module
//!
//! File-per-key persistence of cache entries in the shared data area.
//!
//! Every operation here assumes the caller holds the floor: the coordinator
//! only calls into the store while this process owns the oldest ticket.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::{key_codec, now_ms, CacheEntry};
use crate::error::{CacheError, Result};
use crate::workdir::{self, Workdir};

// == Data Store ==
/// Reads and writes entries under `<workdir>/data`.
#[derive(Debug, Clone)]
pub struct DataStore {
    dir: PathBuf,
    process_id: String,
    max_ttl: u64,
}

impl DataStore {
    // == Constructor ==
    /// Creates a store writing entries owned by `process_id`.
    ///
    /// # Arguments
    /// * `workdir` - Shared work directory
    /// * `process_id` - Identity recorded as owner of written entries
    /// * `max_ttl` - Lifetime in milliseconds of entries without a TTL
    pub fn new(workdir: &Workdir, process_id: impl Into<String>, max_ttl: u64) -> Self {
        Self {
            dir: workdir.data_dir(),
            process_id: process_id.into(),
            max_ttl,
        }
    }

    /// File holding the entry for `key`.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.dir.join(key_codec::encode(key)?))
    }

    // == Read ==
    /// Returns the live entry for `key`, removing it if it has expired.
    pub async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.read_at(key, now_ms()).await
    }

    /// Same as [`read`](Self::read), evaluating expiry at `now`.
    ///
    /// Missing and corrupt files both read as absent.
    pub async fn read_at(&self, key: &str, now: u64) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key)?;

        let entry = match load_entry(&path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(CacheError::Decode { path, source }) => {
                warn!(key = %key, path = %path.display(), error = %source, "Corrupt cache entry treated as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if entry.is_expired_at(now, self.max_ttl) {
            workdir::remove_if_exists(&path).await?;
            debug!(key = %key, age_ms = entry.age_at(now), "Removed expired cache entry on read");
            return Ok(None);
        }

        Ok(Some(entry))
    }

    // == Write ==
    /// Replaces the entry for `key` atomically.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - Optional TTL in milliseconds
    /// * `arrive_at` - When the write was accepted (Unix milliseconds)
    pub async fn write(&self, key: &str, value: Value, ttl: Option<u64>, arrive_at: u64) -> Result<()> {
        let token = key_codec::encode(key)?;
        let entry = CacheEntry::new(value, arrive_at, ttl, self.process_id.as_str());
        let bytes = serde_json::to_vec(&entry)?;

        workdir::atomic_write(&self.dir, &token, &bytes, &self.process_id).await?;
        debug!(key = %key, ttl_ms = ?ttl, "Wrote cache entry");
        Ok(())
    }

    // == Delete ==
    /// Removes the entry for `key`; a missing entry is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if workdir::remove_if_exists(&path).await? {
            debug!(key = %key, "Deleted cache entry");
        }
        Ok(())
    }
}

/// Loads and decodes the entry at `path`; `Ok(None)` when the file is missing.
pub async fn load_entry(path: &Path) -> Result<Option<CacheEntry>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CacheError::Decode {
            path: path.to_path_buf(),
            source,
        })
}
