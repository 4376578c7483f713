//! MedBlock Query Guard
//!
//! Everything the query gateway decides before and after a statement reaches
//! the engine:
//! - classify SQL text as read, mutating or destructive
//! - refuse destructive statements outright
//! - give every statement the same `{columns, rows}` result shape
//! - remember executed text with a timestamp

mod error;
mod log;
mod result;
mod statement;

pub use error::QueryError;
pub use log::{QueryLog, QueryRecord};
pub use result::{QueryResult, SqlValue};
pub use statement::{has_multiple_statements, DeletePolicy, Statement, StatementClass};

pub type Result<T> = std::result::Result<T, QueryError>;
