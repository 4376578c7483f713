//! Core error types

use medblock_query::QueryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Policy rejections and malformed statements, shown as-is
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] medblock_storage::StorageError),

    #[error("Notification error: {0}")]
    Bus(#[from] medblock_bus::BusError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, CoreError::Query(QueryError::PolicyViolation(_)))
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::Query(QueryError::EmptyQuery)
                | CoreError::Query(QueryError::Unsupported(_))
                | CoreError::Query(QueryError::MultipleStatements)
        )
    }
}
