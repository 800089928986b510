//! Durable local store of derivative bytes.
//!
//! # Directory layout
//!
//! ```text
//! <root>/
//!   <64-hex-char cache key>      one file per entry, no extension
//!   ...
//!   .tmp/
//!     <key>.<pid>.<seq>          in-progress writes
//! ```
//!
//! Writes land in `.tmp/` first and are renamed into place, so a reader
//! either sees the complete previous content, the complete new content, or
//! nothing. Listing skips anything whose name is not a valid cache key.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, ReadDir};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::derivative::CacheKey;
use crate::error::CacheError;

/// Name of the temp-file directory inside the cache root.
pub const TMP_DIR_NAME: &str = ".tmp";

/// Temp files older than this are considered abandoned by a crashed write.
pub const ORPHAN_TMP_AGE: Duration = Duration::from_secs(15 * 60);

// =============================================================================
// Entry Metadata
// =============================================================================

/// Size and age of one stored entry, as seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: CacheKey,
    pub size_bytes: u64,
    pub modified_at: SystemTime,
}

// =============================================================================
// CacheIndex Trait
// =============================================================================

/// Metadata view of a derivative store, as needed for eviction.
///
/// The janitor only depends on this trait. The disk store answers it with a
/// directory scan; an indexed store can answer it without one.
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Enumerate up to `limit` entries. Not atomic with respect to
    /// concurrent writes.
    async fn scan(&self, limit: usize) -> Result<Vec<EntryMeta>, CacheError>;

    /// Remove an entry. Removing a missing entry succeeds.
    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError>;
}

// =============================================================================
// DiskCacheStore
// =============================================================================

/// Filesystem-backed derivative store.
///
/// Safe to share between request handlers and the janitor. Reads and writes
/// take no locks; only scans and deletes are serialized with each other.
pub struct DiskCacheStore {
    root: PathBuf,
    tmp_dir: PathBuf,
    next_tmp_id: AtomicU64,
    maintenance: Mutex<()>,
}

impl DiskCacheStore {
    /// Create a store rooted at `root` without touching the filesystem.
    ///
    /// Directories are created on the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let tmp_dir = root.join(TMP_DIR_NAME);
        Self {
            root,
            tmp_dir,
            next_tmp_id: AtomicU64::new(0),
            maintenance: Mutex::new(()),
        }
    }

    /// Create the store, its directories, and clean up abandoned temp files.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let store = Self::new(root);
        fs::create_dir_all(&store.tmp_dir)
            .await
            .map_err(|e| CacheError::io("create", &store.tmp_dir, e))?;
        store.clean_orphaned_tmp(ORPHAN_TMP_AGE).await;
        Ok(store)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry file for a key.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Check whether an entry exists.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        fs::metadata(self.path_for(key))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Read an entry's bytes.
    ///
    /// Returns `CacheError::NotFound` if the entry does not exist, including
    /// when it was evicted after a successful `exists` check.
    pub async fn read(&self, key: &CacheKey) -> Result<Bytes, CacheError> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CacheError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(CacheError::io("read", &path, e)),
        }
    }

    /// Atomically store an entry, replacing any existing one.
    pub async fn write(&self, key: &CacheKey, data: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);

        fs::create_dir_all(&self.tmp_dir)
            .await
            .map_err(|e| CacheError::io("create", &self.tmp_dir, e))?;

        let tmp_path = self.tmp_dir.join(format!(
            "{}.{}.{}",
            key,
            std::process::id(),
            self.next_tmp_id.fetch_add(1, Ordering::Relaxed)
        ));

        let result: std::io::Result<()> = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CacheError::io("write", &path, e));
        }

        debug!(key = %key, bytes = data.len(), "Stored cache entry");
        Ok(())
    }

    /// Delete an entry. Deleting a missing entry succeeds.
    pub async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let _guard = self.maintenance.lock().await;
        self.delete_unlocked(key).await
    }

    async fn delete_unlocked(&self, key: &CacheKey) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io("delete", &path, e)),
        }
    }

    /// Start a lazy enumeration of stored entries.
    ///
    /// A missing root directory yields an empty scan. Calling `list` again
    /// restarts the enumeration from the beginning.
    pub async fn list(&self) -> Result<EntryScan, CacheError> {
        match fs::read_dir(&self.root).await {
            Ok(dir) => Ok(EntryScan {
                dir: Some(dir),
                root: self.root.clone(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EntryScan {
                dir: None,
                root: self.root.clone(),
            }),
            Err(e) => Err(CacheError::io("list", &self.root, e)),
        }
    }

    /// Remove temp files older than `min_age`. Returns how many were removed.
    pub async fn clean_orphaned_tmp(&self, min_age: Duration) -> usize {
        let mut dir = match fs::read_dir(&self.tmp_dir).await {
            Ok(dir) => dir,
            Err(_) => return 0,
        };

        let now = SystemTime::now();
        let mut cleaned = 0;

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            let old_enough = entry
                .metadata()
                .await
                .ok()
                .and_then(|meta| meta.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age >= min_age)
                .unwrap_or(false);

            if !old_enough {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => cleaned += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to clean orphaned tmp file")
                }
            }
        }

        if cleaned > 0 {
            info!(dir = %self.tmp_dir.display(), cleaned, "Cleaned orphaned tmp files");
        }
        cleaned
    }
}

#[async_trait]
impl CacheIndex for DiskCacheStore {
    async fn scan(&self, limit: usize) -> Result<Vec<EntryMeta>, CacheError> {
        let _guard = self.maintenance.lock().await;

        let mut scan = self.list().await?;
        let mut entries = Vec::new();
        while entries.len() < limit {
            match scan.next_entry().await? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        Ok(entries)
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.delete(key).await
    }
}

// =============================================================================
// EntryScan
// =============================================================================

/// Lazy enumeration over the entries of a [`DiskCacheStore`].
pub struct EntryScan {
    dir: Option<ReadDir>,
    root: PathBuf,
}

impl EntryScan {
    /// Advance to the next entry.
    ///
    /// Temp files, subdirectories and foreign files are skipped, as are
    /// entries that disappear between being listed and being inspected.
    pub async fn next_entry(&mut self) -> Result<Option<EntryMeta>, CacheError> {
        let Some(dir) = self.dir.as_mut() else {
            return Ok(None);
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return Ok(None),
                Err(e) => return Err(CacheError::io("list", &self.root, e)),
            };

            let Some(key) = entry.file_name().to_str().and_then(CacheKey::parse) else {
                continue;
            };

            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::io("stat", &entry.path(), e)),
            };

            let modified_at = meta
                .modified()
                .map_err(|e| CacheError::io("stat", &entry.path(), e))?;

            return Ok(Some(EntryMeta {
                key,
                size_bytes: meta.len(),
                modified_at,
            }));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
