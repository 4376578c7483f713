//! MedBlock Core
//!
//! Patient registration on top of an embedded SQLite engine that lives inside
//! each view, persists its whole image after every write, and tells the other
//! views of the same device when the store changed.

mod config;
mod engine;
mod error;
mod gateway;
mod patient;
mod persistence;
mod repository;
mod view;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use engine::EngineAdapter;
pub use error::CoreError;
pub use gateway::QueryGateway;
pub use patient::{
    format_created_at, parse_created_at, sample_patients, Age, Gender, NewPatient, Patient,
};
pub use persistence::{ImageWriter, WriteThrough};
pub use repository::{reconcile_by_id, PatientRepository};
pub use view::View;

// Re-export the layers underneath
pub use medblock_bus::{
    BusError, ChangeKind, ChannelHub, Notification, NotificationBus, Subscription,
    SubscriptionHandle, ViewId,
};
pub use medblock_query::{
    DeletePolicy, QueryError, QueryLog, QueryRecord, QueryResult, SqlValue, StatementClass,
};
pub use medblock_storage::{
    BlobStore, Database, DatabaseImage, FileBlobStore, MemoryBlobStore, StorageError,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
