//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid database image: {0}")]
    InvalidImage(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
