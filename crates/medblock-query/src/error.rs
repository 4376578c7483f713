//! Query error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("{0}")]
    PolicyViolation(String),

    #[error("Query cannot be empty")]
    EmptyQuery,

    #[error("Unsupported statement: {0}")]
    Unsupported(String),

    #[error("Only one statement can be executed at a time")]
    MultipleStatements,

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
