//! Unit of work and typed repositories over a SQLite session.
//!
//! A [`UnitOfWork`] owns one connection and its change-tracking table.
//! Repositories obtained from it stage inserts, updates and deletes on that
//! shared table; `save_changes` flushes them in one store transaction and
//! `reject_changes` reverts them without ending the unit of work.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod session;
pub mod unit_of_work;

pub use db::{open_db, DbError, DbResult, Migration, SessionOptions};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityKey};
pub use model::tracked::{Tracked, TrackingState};
pub use repo::error::{RepoError, RepoResult};
pub use repo::query::{Includer, Query};
pub use repo::repository::{EntitySet, Repository};
pub use session::{EntryInfo, Session};
pub use tokio_util::sync::CancellationToken;
pub use unit_of_work::UnitOfWork;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
