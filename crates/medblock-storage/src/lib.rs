//! MedBlock Storage Layer
//!
//! The embedded SQLite engine for one view, its exportable database image,
//! and the durable blob store the image is persisted to. File-backed stores
//! can be watched for saves made by other processes.

mod blob;
mod database;
mod error;
mod migrations;

pub use blob::{BlobStore, BlobWatch, FileBlobStore, MemoryBlobStore};
pub use database::{Database, DatabaseImage, ImageDigest};
pub use error::StorageError;
pub use migrations::SCHEMA_VERSION;

pub type Result<T> = std::result::Result<T, StorageError>;
