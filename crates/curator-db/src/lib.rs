//! Curator DB - SQLite metadata store
//!
//! The relational adapter behind `IMetadataRepository`:
//! - connection pooling with WAL journal mode
//! - schema migration on first connection
//! - transient-error retry with fixed backoff
//! - conditional updates for state transitions and task claims

pub mod pool;
pub mod repository;
mod retry;

pub use pool::DatabasePool;
pub use repository::SqliteMetadataRepository;

use thiserror::Error;

/// Errors raised by the database adapter
#[derive(Debug, Error)]
pub enum DbError {
    /// Could not open or create the database
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped back to a domain type
    #[error("Serialization error: {0}")]
    Serialization(String),
}
