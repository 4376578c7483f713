//! Durable blob storage
//!
//! Keyed byte blobs that outlive the process. A save fully replaces the
//! previous value for its key.

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::StorageError;
use crate::Result;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Replace the blob stored under `key`.
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch the blob stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Watch `key` for saves, including saves from other processes. Stores
    /// that live inside one process return `None`.
    fn watch(&self, _key: &str) -> Result<Option<BlobWatch>> {
        Ok(None)
    }
}

/// Pending changes coalesce, so a burst of saves may wake the receiver once.
const WATCH_CAPACITY: usize = 1;

/// Change feed for one blob. Dropping it stops the watch.
pub struct BlobWatch {
    _watcher: RecommendedWatcher,
    changes: mpsc::Receiver<()>,
}

impl BlobWatch {
    /// Wait for the next save. `None` once the watcher has shut down.
    pub async fn changed(&mut self) -> Option<()> {
        self.changes.recv().await
    }
}

/// One file per key under a directory.
///
/// Writes go to `<key>.tmp` and are renamed over `<key>.bin`, so a reader
/// never observes a half-written blob.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.bin")))
    }
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.blob_path(key)?;
        let tmp = path.with_extension("tmp");

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key = %key, bytes = bytes.len(), "Saved blob");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn watch(&self, key: &str) -> Result<Option<BlobWatch>> {
        let path = self.blob_path(key)?;
        let file_name = path.file_name().map(|name| name.to_os_string());
        std::fs::create_dir_all(&self.dir)?;

        let (tx, changes) = mpsc::channel(WATCH_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Blob watch error");
                        return;
                    }
                };

                // Saves land as a rename of the temp file onto the blob
                let is_save = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
                if is_save
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref())
                {
                    // Full means a wake-up is already pending
                    let _ = tx.try_send(());
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        tracing::debug!(key = %key, dir = ?self.dir, "Watching blob");
        Ok(Some(BlobWatch {
            _watcher: watcher,
            changes,
        }))
    }
}

/// Blob store kept in memory. Clones share the same map, so several views
/// built from clones behave like tabs sharing one device's storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.write().remove(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.blobs.read().get(key).cloned())
    }
}
