//! Shared helpers for unit tests

use async_trait::async_trait;
use medblock_storage::{BlobStore, MemoryBlobStore, Result, StorageError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Store whose every call fails, like storage that is full or unreachable.
pub struct FailingStore;

#[async_trait]
impl BlobStore for FailingStore {
    async fn save(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
        Err(StorageError::Io(std::io::Error::other("disk full")))
    }

    async fn load(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(StorageError::Io(std::io::Error::other("storage unavailable")))
    }
}

/// Wraps a store whose saves can be switched to fail, like a disk that fills
/// up and is later cleared. Clones share the switch.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryBlobStore,
    failing: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(inner: MemoryBlobStore) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_saves(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.save(key, bytes).await
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(key).await
    }
}
