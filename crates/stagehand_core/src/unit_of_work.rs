//! Unit of work: one session, a per-type repository cache, commit and
//! rollback across every tracked entity.
//!
//! # Responsibility
//! - Own the session and release it exactly once.
//! - Build each repository type once and share it.
//! - Commit or roll back everything staged through any repository.
//!
//! # Invariants
//! - At most one repository instance per entity type.
//! - Every operation after `dispose` fails with `RepoError::Disposed`.
//! - Not for concurrent use; the type is neither `Send` nor `Sync`.

use crate::db::{open_db, Migration, SessionOptions};
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::repository::{EntitySet, Repository};
use crate::session::{EntryInfo, Session};
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio_util::sync::CancellationToken;

pub struct UnitOfWork {
    session: Rc<Session>,
    repositories: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

impl UnitOfWork {
    /// Takes ownership of an already configured connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            session: Rc::new(Session::new(conn)),
            repositories: RefCell::new(HashMap::new()),
        }
    }

    /// Opens a connection from `options`, applies `migrations` and wraps it.
    pub fn open(options: &SessionOptions, migrations: &[Migration]) -> RepoResult<Self> {
        let conn = open_db(options, migrations)?;
        Ok(Self::new(conn))
    }

    /// Returns the repository for entity type `T`, building `R` on first use.
    ///
    /// # Errors
    /// - `Configuration` when `T`'s table mapping does not match the store,
    ///   when `R::try_new` refuses, or when `T` was already served by a
    ///   different repository type.
    /// - `Disposed` after `dispose`.
    pub fn repository<T, R>(&self) -> RepoResult<Rc<R>>
    where
        T: Entity,
        R: Repository<Entity = T>,
    {
        self.session.ensure_open()?;

        let type_id = TypeId::of::<T>();
        let cached = self.repositories.borrow().get(&type_id).cloned();
        if let Some(cached) = cached {
            return cached.downcast::<R>().map_err(|_| {
                RepoError::Configuration(format!(
                    "`{}` is already served by another repository type than `{}`",
                    T::entity_name(),
                    type_name::<R>()
                ))
            });
        }

        let repository = match EntitySet::<T>::bind(Rc::clone(&self.session)).and_then(R::try_new) {
            Ok(repository) => Rc::new(repository),
            Err(err) => {
                warn!(
                    "event=repository_build module=uow status=error entity={} error={}",
                    T::entity_name(),
                    err
                );
                return Err(err);
            }
        };

        let shared: Rc<dyn Any> = repository.clone();
        self.repositories.borrow_mut().insert(type_id, shared);
        debug!(
            "event=repository_build module=uow status=ok entity={} repository={}",
            T::entity_name(),
            type_name::<R>()
        );
        Ok(repository)
    }

    /// Commits every staged change atomically. Returns affected rows.
    pub fn save_changes(&self) -> RepoResult<usize> {
        self.save_changes_with(&CancellationToken::new())
    }

    pub fn save_changes_with(&self, cancel: &CancellationToken) -> RepoResult<usize> {
        self.session.save_changes(cancel)
    }

    /// Rolls back staged changes without ending the unit of work.
    pub fn reject_changes(&self) -> RepoResult<()> {
        self.reject_changes_with(&CancellationToken::new())
    }

    pub fn reject_changes_with(&self, cancel: &CancellationToken) -> RepoResult<()> {
        self.session.reject_changes(cancel)
    }

    /// Runs a raw parameterized command. The tracking table is not updated
    /// to reflect its effects.
    pub fn execute_sql_command(&self, sql: &str, params: &[Value]) -> RepoResult<usize> {
        self.execute_sql_command_with(sql, params, &CancellationToken::new())
    }

    pub fn execute_sql_command_with(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> RepoResult<usize> {
        self.session.execute(sql, params, cancel)
    }

    /// Tracked entries in staging order.
    pub fn entries(&self) -> RepoResult<Vec<EntryInfo>> {
        self.session.entries()
    }

    pub fn has_changes(&self) -> RepoResult<bool> {
        self.session.has_changes()
    }

    pub fn is_disposed(&self) -> bool {
        self.session.is_closed()
    }

    /// Releases the session and its connection. Safe to call repeatedly.
    pub fn dispose(&self) -> RepoResult<()> {
        self.repositories.borrow_mut().clear();
        if self.session.close()? {
            info!("event=uow_dispose module=uow status=ok");
        } else {
            debug!("event=uow_dispose module=uow status=skipped reason=already_disposed");
        }
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            warn!("event=uow_dispose module=uow status=error error={err}");
        }
    }
}
