//! Database connection, image export and image restore

use parking_lot::Mutex;
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::StorageError;
use crate::migrations::run_migrations;
use crate::Result;

/// Every SQLite database file starts with this header.
const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// SHA-256 of an image's bytes.
pub type ImageDigest = [u8; 32];

/// The serialized state of a whole database: SQLite's own file format, so it
/// carries its schema and can be reopened with no other metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseImage(Vec<u8>);

impl DatabaseImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Identifies these exact bytes, so a stored image can be compared with
    /// the one a view last saved or loaded.
    pub fn digest(&self) -> ImageDigest {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(&self.0));
        digest
    }
}

impl From<Vec<u8>> for DatabaseImage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// In-memory SQLite engine instance for a single view.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create an empty in-memory database with the current schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Rebuild an in-memory database from a previously exported image.
    pub fn from_image(image: &DatabaseImage) -> Result<Self> {
        if image.is_empty() {
            return Err(StorageError::InvalidImage("empty image".to_string()));
        }
        if !image.as_bytes().starts_with(SQLITE_HEADER) {
            return Err(StorageError::InvalidImage(format!(
                "missing SQLite header ({} bytes)",
                image.len()
            )));
        }

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("image.db");
        std::fs::write(&path, image.as_bytes())?;

        let mut conn = Connection::open_in_memory()?;
        conn.restore(DatabaseName::Main, &path, None::<fn(Progress)>)?;

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(StorageError::InvalidImage(check));
        }

        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Serialize the full database (schema and rows) into an image.
    pub fn export_image(&self) -> Result<DatabaseImage> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("image.db");

        {
            let conn = self.conn.lock();
            conn.backup(DatabaseName::Main, &path, None)?;
        }

        Ok(DatabaseImage(std::fs::read(&path)?))
    }

    /// [`Database::from_image`] on the blocking pool.
    pub async fn restore(image: DatabaseImage) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::from_image(&image)).await?
    }

    /// [`Database::export_image`] on the blocking pool.
    pub async fn export(&self) -> Result<DatabaseImage> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.export_image()).await?
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}
