//! SQLite store bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure the one SQLite connection owned by a session.
//! - Apply caller-supplied schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - A session never reads or writes entity tables before migrations succeed.

pub mod migrations;
mod open;
mod options;

pub use migrations::Migration;
pub use open::open_db;
pub use options::SessionOptions;

use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

/// Store transport and bootstrap errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(
        "database schema version {db_version} is newer than supported {latest_supported}"
    )]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },

    /// Migration list is not strictly increasing.
    #[error("migration version {version} does not follow version {previous}")]
    NonMonotonicMigration { previous: u32, version: u32 },
}
