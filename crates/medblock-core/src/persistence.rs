//! Write-through persistence
//!
//! After every mutating statement the whole database image is exported and
//! saved, then the change is announced. Persistence failures are logged and
//! swallowed: the in-memory state stays valid and the next successful save
//! catches the durable copy up.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use medblock_bus::{ChangeKind, Notification, NotificationBus};
use medblock_query::StatementClass;
use medblock_storage::{BlobStore, Database, DatabaseImage, ImageDigest};

#[derive(Default)]
struct WriterState {
    /// Digest of the image this view last saved or loaded
    known: Mutex<Option<ImageDigest>>,
    /// Set while the stored image is behind the in-memory engine
    dirty: AtomicBool,
    /// Serializes saves and staleness checks within the view
    io: tokio::sync::Mutex<()>,
}

/// The only writer of the database image.
#[derive(Clone)]
pub struct ImageWriter {
    store: Arc<dyn BlobStore>,
    key: String,
    state: Arc<WriterState>,
}

impl ImageWriter {
    pub fn new(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            state: Arc::new(WriterState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// True when the last save failed, so storage lacks changes this view
    /// already reported as done.
    pub fn is_dirty(&self) -> bool {
        self.state.dirty.load(Ordering::SeqCst)
    }

    /// Export `db` and overwrite the stored image. Returns whether the save
    /// went through.
    pub async fn persist(&self, db: &Database) -> bool {
        let _io = self.state.io.lock().await;

        let image = match db.export().await {
            Ok(image) => image,
            Err(e) => {
                self.state.dirty.store(true, Ordering::SeqCst);
                tracing::error!(key = %self.key, error = %e, "Failed to export database image");
                return false;
            }
        };

        match self.store.save(&self.key, image.as_bytes()).await {
            Ok(()) => {
                *self.state.known.lock() = Some(image.digest());
                self.state.dirty.store(false, Ordering::SeqCst);
                tracing::debug!(key = %self.key, bytes = image.len(), "Database saved");
                true
            }
            Err(e) => {
                self.state.dirty.store(true, Ordering::SeqCst);
                tracing::error!(key = %self.key, error = %e, "Failed to save database image");
                false
            }
        }
    }

    /// Read the stored image, remembering it as the one this view is based on.
    pub(crate) async fn load(&self) -> medblock_storage::Result<Option<DatabaseImage>> {
        let _io = self.state.io.lock().await;

        let image = self.store.load(&self.key).await?.map(DatabaseImage::from);
        if let Some(image) = &image {
            *self.state.known.lock() = Some(image.digest());
            self.state.dirty.store(false, Ordering::SeqCst);
        }
        Ok(image)
    }

    /// Whether the stored image differs from the one this view last saved or
    /// loaded, meaning someone else wrote it.
    pub async fn stored_is_foreign(&self) -> bool {
        let _io = self.state.io.lock().await;

        let stored = match self.store.load(&self.key).await {
            Ok(Some(bytes)) => DatabaseImage::from(bytes).digest(),
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to check stored image");
                return false;
            }
        };

        *self.state.known.lock() != Some(stored)
    }
}

pub struct WriteThrough {
    writer: ImageWriter,
    bus: Arc<NotificationBus>,
}

impl WriteThrough {
    pub fn new(writer: ImageWriter, bus: Arc<NotificationBus>) -> Self {
        Self { writer, bus }
    }

    pub fn writer(&self) -> &ImageWriter {
        &self.writer
    }

    /// Persist and announce a statement that already executed on `db`.
    /// Reads are ignored.
    pub async fn after_statement(
        &self,
        class: StatementClass,
        kind: ChangeKind,
        db: &Database,
    ) -> Option<Notification> {
        if !class.is_mutating() {
            return None;
        }

        self.writer.persist(db).await;
        Some(self.bus.publish(kind))
    }
}
