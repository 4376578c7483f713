//! Engine adapter
//!
//! Owns the single in-memory engine instance of a view. The instance is built
//! lazily: from the stored image when one exists, otherwise from a fresh
//! schema with the sample rows. Concurrent callers share one construction.
//!
//! Once built, the instance is only replaced when the stored image turns out
//! to have been written by someone else, and never while this view holds
//! changes that have not reached storage yet.

use chrono::Local;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use medblock_storage::Database;

use crate::patient::{format_created_at, sample_patients};
use crate::persistence::ImageWriter;
use crate::Result;

const INSERT_PATIENT_SQL: &str =
    "INSERT INTO patients (name, age, gender, dateOfBirth, address, createdAt)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

pub struct EngineAdapter {
    writer: ImageWriter,
    seed_sample_data: bool,
    /// Swapped for an empty cell on reset; in-flight callers keep the old one
    cell: RwLock<Arc<OnceCell<Database>>>,
    constructions: AtomicUsize,
}

impl EngineAdapter {
    pub fn new(writer: ImageWriter, seed_sample_data: bool) -> Self {
        Self {
            writer,
            seed_sample_data,
            cell: RwLock::new(Arc::new(OnceCell::new())),
            constructions: AtomicUsize::new(0),
        }
    }

    /// The view's engine, constructed on first use.
    ///
    /// A failed construction leaves nothing behind, so the next call starts
    /// over instead of reusing the failure.
    pub async fn engine(&self) -> Result<Database> {
        let cell = Arc::clone(&self.cell.read());
        let db = cell.get_or_try_init(|| self.construct()).await?;
        Ok(db.clone())
    }

    /// Drop the current instance. The next [`EngineAdapter::engine`] call
    /// rebuilds it from the stored image.
    pub fn reset(&self) {
        *self.cell.write() = Arc::new(OnceCell::new());
        tracing::debug!("Engine instance discarded");
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.read().initialized()
    }

    /// Drop the instance if another view or process saved a newer image.
    /// Returns whether the instance was dropped.
    ///
    /// While this view's own last save failed, its in-memory state is the
    /// only copy of those changes: it is saved again instead of discarded.
    pub async fn refresh_if_stale(&self) -> bool {
        let Some(db) = self.current() else {
            return false;
        };

        if self.writer.is_dirty() {
            if self.writer.persist(&db).await {
                tracing::info!("Unsaved changes caught up with storage");
            } else {
                tracing::warn!("Keeping unsaved engine state; storage is still failing");
            }
            return false;
        }

        if self.writer.stored_is_foreign().await {
            self.reset();
            return true;
        }
        false
    }

    /// Number of successful constructions so far.
    pub fn construction_count(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    fn current(&self) -> Option<Database> {
        self.cell.read().get().cloned()
    }

    async fn construct(&self) -> Result<Database> {
        let key = self.writer.key();

        let image = match self.writer.load().await {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to load database image, starting fresh");
                None
            }
        };

        let db = match image {
            Some(image) => {
                let bytes = image.len();
                let db = Database::restore(image).await?;
                tracing::info!(source = "image", bytes, "Engine constructed");
                db
            }
            None => {
                let db = Database::open_in_memory()?;
                if self.seed_sample_data {
                    seed_sample_patients(&db)?;
                }
                self.writer.persist(&db).await;
                tracing::info!(
                    source = "fresh",
                    seeded = self.seed_sample_data,
                    "Engine constructed"
                );
                db
            }
        };

        self.constructions.fetch_add(1, Ordering::SeqCst);
        Ok(db)
    }
}

fn seed_sample_patients(db: &Database) -> Result<()> {
    let created_at = format_created_at(Local::now());
    let patients = sample_patients();

    db.transaction(|conn| {
        let mut stmt = conn.prepare(INSERT_PATIENT_SQL)?;
        for patient in &patients {
            stmt.execute(rusqlite::params![
                patient.name,
                patient.age.years().unwrap_or_default(),
                patient.gender.as_str(),
                patient.date_of_birth,
                patient.address,
                created_at,
            ])?;
        }
        Ok(())
    })?;

    tracing::info!(count = patients.len(), "Added sample patients");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingStore, FlakyStore};
    use medblock_storage::{BlobStore, MemoryBlobStore};

    fn adapter(store: &MemoryBlobStore) -> EngineAdapter {
        EngineAdapter::new(
            ImageWriter::new(Arc::new(store.clone()), "database_binary"),
            true,
        )
    }

    async fn patient_count(adapter: &EngineAdapter) -> i64 {
        adapter
            .engine()
            .await
            .unwrap()
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?)
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_init_constructs_once() {
        let store = MemoryBlobStore::new();
        let adapter = adapter(&store);

        let (a, b, c) = tokio::join!(adapter.engine(), adapter.engine(), adapter.engine());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        assert_eq!(adapter.construction_count(), 1);
        assert_eq!(patient_count(&adapter).await, 3);
        assert!(store.contains("database_binary"));
    }

    #[tokio::test]
    async fn test_existing_image_is_not_reseeded() {
        let store = MemoryBlobStore::new();
        let first = adapter(&store);
        assert_eq!(patient_count(&first).await, 3);

        // A second view on the same storage loads the image instead
        let second = adapter(&store);
        assert_eq!(patient_count(&second).await, 3);
    }

    #[tokio::test]
    async fn test_reset_rebuilds_from_image() {
        let store = MemoryBlobStore::new();
        let adapter = adapter(&store);
        patient_count(&adapter).await;

        adapter.reset();
        assert!(!adapter.is_initialized());
        assert_eq!(patient_count(&adapter).await, 3);
        assert_eq!(adapter.construction_count(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_image_fails_then_retries() {
        let store = MemoryBlobStore::new();
        store.save("database_binary", b"garbage").await.unwrap();
        let adapter = adapter(&store);

        assert!(adapter.engine().await.is_err());
        assert!(!adapter.is_initialized());

        store.remove("database_binary");
        assert!(adapter.engine().await.is_ok());
        assert_eq!(adapter.construction_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_instance_is_dropped() {
        let store = MemoryBlobStore::new();
        let ours = adapter(&store);
        let theirs = adapter(&store);
        patient_count(&ours).await;
        assert!(!ours.refresh_if_stale().await);

        let db = theirs.engine().await.unwrap();
        db.with_connection(|conn| {
            conn.execute("DELETE FROM patients WHERE name = 'John Smith'", [])?;
            Ok(())
        })
        .unwrap();
        assert!(theirs.writer.persist(&db).await);

        assert!(ours.refresh_if_stale().await);
        assert_eq!(patient_count(&ours).await, 2);
    }

    #[tokio::test]
    async fn test_unsaved_instance_is_kept() {
        let store = FlakyStore::new(MemoryBlobStore::new());
        let adapter = EngineAdapter::new(
            ImageWriter::new(Arc::new(store.clone()), "database_binary"),
            true,
        );
        let db = adapter.engine().await.unwrap();

        store.fail_saves(true);
        db.with_connection(|conn| {
            conn.execute("DELETE FROM patients", [])?;
            Ok(())
        })
        .unwrap();
        assert!(!adapter.writer.persist(&db).await);

        // Still failing: nothing is dropped
        assert!(!adapter.refresh_if_stale().await);
        assert_eq!(patient_count(&adapter).await, 0);

        // Recovered: the save goes through and the instance stays
        store.fail_saves(false);
        assert!(!adapter.refresh_if_stale().await);
        assert!(!adapter.writer.is_dirty());
        assert_eq!(patient_count(&adapter).await, 0);
        assert_eq!(adapter.construction_count(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_storage_starts_fresh() {
        let adapter = EngineAdapter::new(
            ImageWriter::new(Arc::new(FailingStore), "database_binary"),
            false,
        );

        let db = adapter.engine().await.unwrap();
        let count: i64 = db
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
