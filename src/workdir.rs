//! Shared Work Directory
//!
//! Layout of the directory shared between processes and the few filesystem
//! primitives every area uses: listing, atomic replace and tolerant removal.
//!
//! ```text
//! <workdir>/proc/<processId>              heartbeat, content = timestamp ms
//! <workdir>/queue/<issuedAt>-<processId>  admission ticket, empty
//! <workdir>/data/<encodedKey>             serialized cache entry
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;

use crate::error::{CacheError, Result};

/// Prefix of in-flight files written by [`atomic_write`].
const TEMP_PREFIX: &str = ".tmp-";

/// Distinguishes concurrent temp files of one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// == Workdir ==
/// Paths of the three shared areas under one root.
#[derive(Debug, Clone)]
pub struct Workdir {
    root: PathBuf,
}

impl Workdir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Heartbeat area.
    pub fn proc_dir(&self) -> PathBuf {
        self.root.join("proc")
    }

    /// Ticket area.
    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    /// Entry area.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Creates the three areas. Safe to call from several processes at once.
    pub async fn ensure(&self) -> Result<()> {
        for dir in [self.proc_dir(), self.queue_dir(), self.data_dir()] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| CacheError::io(&dir, e))?;
        }
        Ok(())
    }
}

// == Directory Listing ==
/// Lists entry names in `dir`, skipping dot-prefixed (temporary) files.
pub async fn list_names(dir: &Path) -> Result<Vec<String>> {
    Ok(list_all(dir)
        .await?
        .into_iter()
        .filter(|name| !name.starts_with('.'))
        .collect())
}

/// Lists leftover temp files in `dir` as `(file name, owning process id)`.
pub async fn list_temp_files(dir: &Path) -> Result<Vec<(String, String)>> {
    Ok(list_all(dir)
        .await?
        .into_iter()
        .filter_map(|name| {
            let owner = temp_owner(&name)?.to_string();
            Some((name, owner))
        })
        .collect())
}

async fn list_all(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| CacheError::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CacheError::io(dir, e))?
    {
        // Non UTF-8 names are never produced by this crate.
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

// == Atomic Replace ==
/// Replaces `dir/name` with `contents` so readers never observe a partial file.
///
/// The bytes are written to a temp file in the same directory and renamed over
/// the target, which is atomic on a single filesystem.
pub async fn atomic_write(dir: &Path, name: &str, contents: &[u8], process_id: &str) -> Result<()> {
    let target = dir.join(name);
    let temp = dir.join(temp_name(process_id));

    if let Err(e) = fs::write(&temp, contents).await {
        let _ = fs::remove_file(&temp).await;
        return Err(CacheError::io(&temp, e));
    }

    if let Err(e) = fs::rename(&temp, &target).await {
        let _ = fs::remove_file(&temp).await;
        return Err(CacheError::io(&target, e));
    }

    Ok(())
}

/// Removes a file, treating a missing file as success.
///
/// Returns whether this call removed it.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// `.tmp-<processId>-<n>`; the target name is left out so its length does
/// not count against the filesystem limit twice.
fn temp_name(process_id: &str) -> String {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{TEMP_PREFIX}{process_id}-{n}")
}

/// Process id embedded in a temp file name. Process ids never contain `-`.
fn temp_owner(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(TEMP_PREFIX)?;
    let (owner, _) = rest.split_once('-')?;
    Some(owner)
}
