//! Typed repository contract and the session-backed entity set.
//!
//! # Responsibility
//! - Translate CRUD and query calls into session state transitions.
//! - Resolve every loaded row through the session identity map.
//!
//! # Invariants
//! - Repositories hold no state besides the shared session handle.
//! - Queries read the store: rows staged as `Added` are not listed until
//!   committed, rows staged as `Deleted` are listed until committed.
//! - `get` consults the identity map first and sees every tracked state.
//!
//! `find`, `first` and `list` read every row of the table and apply the
//! query predicate in memory unless the query carries a `Query::where_sql`
//! condition, which is evaluated by the store first.

use super::error::{RepoError, RepoResult};
use super::query::{Includer, Query};
use crate::model::entity::{Entity, EntityKey};
use crate::model::tracked::{Tracked, TrackingState};
use crate::session::Session;
use std::marker::PhantomData;
use std::rc::Rc;

/// Generic repository for `T` bound to one session.
///
/// Every repository built by a unit of work wraps one of these; it is also a
/// complete repository on its own.
pub struct EntitySet<T> {
    session: Rc<Session>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for EntitySet<T> {
    fn clone(&self) -> Self {
        Self {
            session: Rc::clone(&self.session),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> EntitySet<T> {
    /// Binds to `session` after checking the table mapping.
    pub(crate) fn bind(session: Rc<Session>) -> RepoResult<Self> {
        session.ensure_table::<T>()?;
        Ok(Self {
            session,
            _entity: PhantomData,
        })
    }

    pub fn get(&self, id: impl Into<EntityKey>) -> RepoResult<Option<Tracked<T>>> {
        let key = id.into();
        if let Some(tracked) = self.session.lookup::<T>(&key)? {
            return Ok(Some(tracked));
        }

        match self.session.fetch_by_key::<T>(&key)? {
            Some(row) => {
                let tracked = self.session.resolve_all(vec![row])?;
                Ok(tracked.into_iter().next())
            }
            None => Ok(None),
        }
    }

    /// Single match or `None`; more than one match is `MultipleResults`.
    pub fn find(&self, query: Query<T>) -> RepoResult<Option<Tracked<T>>> {
        let mut matches = self.matching(&query)?;
        if matches.len() > 1 {
            return Err(RepoError::MultipleResults {
                entity: T::entity_name(),
                count: matches.len(),
            });
        }

        let found = matches.pop();
        if let Some(handle) = &found {
            self.include(&query, std::slice::from_ref(handle))?;
        }
        Ok(found)
    }

    /// First match after ordering, or `None`.
    pub fn first(&self, query: Query<T>) -> RepoResult<Option<Tracked<T>>> {
        let found = self.matching(&query)?.into_iter().next();
        if let Some(handle) = &found {
            self.include(&query, std::slice::from_ref(handle))?;
        }
        Ok(found)
    }

    pub fn list(&self, query: Query<T>) -> RepoResult<Vec<Tracked<T>>> {
        let matches = self.matching(&query)?;
        self.include(&query, &matches)?;
        Ok(matches)
    }

    pub fn add(&self, entity: impl Into<Tracked<T>>) -> RepoResult<Tracked<T>> {
        self.session.stage_added(entity.into())
    }

    pub fn update(&self, entity: impl Into<Tracked<T>>) -> RepoResult<Tracked<T>> {
        self.session.stage_modified(entity.into())
    }

    /// Always `1` on success; the row count is only known after commit.
    pub fn delete(&self, entity: impl Into<Tracked<T>>) -> RepoResult<usize> {
        self.session.stage_deleted(entity.into())?;
        Ok(1)
    }

    pub fn state_of(&self, entity: &Tracked<T>) -> RepoResult<TrackingState> {
        self.session.state_of(entity)
    }

    pub fn detach(&self, entity: &Tracked<T>) -> RepoResult<()> {
        self.session.detach(entity)
    }

    pub fn reload(&self, entity: &Tracked<T>) -> RepoResult<()> {
        self.session.reload(entity)
    }

    fn matching(&self, query: &Query<T>) -> RepoResult<Vec<Tracked<T>>> {
        let rows = self
            .session
            .fetch_where::<T>(query.condition(), query.params())?
            .into_iter()
            .filter(|row| query.matches(row))
            .collect::<Vec<_>>();
        let mut tracked = self.session.resolve_all(rows)?;
        if query.is_ordered() {
            tracked.sort_by(|left, right| query.compare(&left.borrow(), &right.borrow()));
        }
        Ok(tracked)
    }

    /// Includes run on a copy that is written back, so an include may load
    /// the entity's own type without a borrow conflict.
    fn include(&self, query: &Query<T>, handles: &[Tracked<T>]) -> RepoResult<()> {
        if !query.has_includes() {
            return Ok(());
        }

        let includer = Includer::new(&self.session);
        for handle in handles {
            let mut entity = handle.snapshot();
            query.run_includes(&mut entity, &includer)?;
            handle.replace(entity);
        }
        Ok(())
    }
}

/// Typed repository contract over one entity type.
///
/// Implementors wrap an [`EntitySet`] and may add domain queries; every CRUD
/// and query operation is provided on top of `entities()`. The unit of work
/// builds each repository once through `try_new`.
pub trait Repository: Sized + 'static {
    type Entity: Entity;

    /// Builds the repository. Return `RepoError::Configuration` when it
    /// cannot serve this session.
    fn try_new(entities: EntitySet<Self::Entity>) -> RepoResult<Self>;

    fn entities(&self) -> &EntitySet<Self::Entity>;

    /// Fetch by primary key. Found rows are tracked `Unchanged`.
    fn get(&self, id: impl Into<EntityKey>) -> RepoResult<Option<Tracked<Self::Entity>>> {
        self.entities().get(id)
    }

    /// At most one match.
    fn find(&self, query: Query<Self::Entity>) -> RepoResult<Option<Tracked<Self::Entity>>> {
        self.entities().find(query)
    }

    fn first(&self, query: Query<Self::Entity>) -> RepoResult<Option<Tracked<Self::Entity>>> {
        self.entities().first(query)
    }

    fn list(&self, query: Query<Self::Entity>) -> RepoResult<Vec<Tracked<Self::Entity>>> {
        self.entities().list(query)
    }

    /// Stages `Added` and returns the tracked handle.
    fn add(&self, entity: impl Into<Tracked<Self::Entity>>) -> RepoResult<Tracked<Self::Entity>> {
        self.entities().add(entity)
    }

    /// Stages a full-row update. Returns the tracked handle for the identity.
    fn update(
        &self,
        entity: impl Into<Tracked<Self::Entity>>,
    ) -> RepoResult<Tracked<Self::Entity>> {
        self.entities().update(entity)
    }

    fn delete(&self, entity: impl Into<Tracked<Self::Entity>>) -> RepoResult<usize> {
        self.entities().delete(entity)
    }

    fn state_of(&self, entity: &Tracked<Self::Entity>) -> RepoResult<TrackingState> {
        self.entities().state_of(entity)
    }

    fn detach(&self, entity: &Tracked<Self::Entity>) -> RepoResult<()> {
        self.entities().detach(entity)
    }

    /// Requires a tracked identity; fails with `DetachedEntity` otherwise.
    fn reload(&self, entity: &Tracked<Self::Entity>) -> RepoResult<()> {
        self.entities().reload(entity)
    }
}

impl<T: Entity> Repository for EntitySet<T> {
    type Entity = T;

    fn try_new(entities: EntitySet<T>) -> RepoResult<Self> {
        Ok(entities)
    }

    fn entities(&self) -> &EntitySet<T> {
        self
    }
}
