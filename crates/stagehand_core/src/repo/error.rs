//! Error taxonomy for repository and unit-of-work operations.

use crate::db::DbError;
use crate::model::entity::EntityKey;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors surfaced by repositories and the unit of work.
///
/// A lookup that finds nothing is not an error: `get`, `find` and `first`
/// return `Ok(None)`.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Query, reload or bootstrap failure reported by the store.
    #[error(transparent)]
    Db(#[from] DbError),

    /// `find` matched more than one row.
    #[error("expected at most one {entity}, found {count}")]
    MultipleResults { entity: &'static str, count: usize },

    /// The key of a tracked instance was edited. Keys are immutable while
    /// tracked; reload the entity to restore it or detach it first.
    #[error("{entity} {tracked} is tracked under its original key; its key was changed to {current}")]
    KeyChanged {
        entity: &'static str,
        tracked: EntityKey,
        current: EntityKey,
    },

    /// The operation needs a tracked identity and the entity is detached.
    #[error("{entity} {key} is not tracked by this unit of work")]
    DetachedEntity {
        entity: &'static str,
        key: EntityKey,
    },

    /// `add` of an identity the session already tracks.
    #[error("{entity} {key} is already tracked by this unit of work")]
    AlreadyTracked {
        entity: &'static str,
        key: EntityKey,
    },

    /// The store rejected a flushed statement, the commit or a raw command.
    #[error("store rejected {context}: {source}")]
    StoreCommand {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    /// An update or delete reached a row that no longer exists.
    #[error("{entity} {key} no longer exists in the store")]
    ConcurrencyConflict {
        entity: &'static str,
        key: EntityKey,
    },

    /// A repository cannot be built for the requested entity type.
    #[error("repository configuration error: {0}")]
    Configuration(String),

    /// The unit of work already released its session.
    #[error("unit of work has been disposed")]
    Disposed,

    /// Rollback found rows that another session deleted. Those entries were
    /// evicted; every other entry was rolled back.
    #[error("rollback could not reload {} entities missing from the store", .entities.len())]
    ReloadTargetMissing {
        entities: Vec<(&'static str, EntityKey)>,
    },

    /// The cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn store_command(context: impl Into<String>, source: rusqlite::Error) -> RepoError {
    RepoError::StoreCommand {
        context: context.into(),
        source,
    }
}
