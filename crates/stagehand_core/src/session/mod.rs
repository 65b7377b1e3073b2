//! Store session: one connection plus the change-tracking table.
//!
//! # Responsibility
//! - Own the store connection for the lifetime of a unit of work.
//! - Keep the identity map: one entry per (entity type, key).
//! - Apply the tracking state machine and flush or revert staged changes.
//!
//! # Invariants
//! - Tracking state changes only through the `stage_*`, `detach`, `reload`,
//!   `save_changes` and `reject_changes` operations.
//! - An instance is tracked under at most one identity. Staging an instance
//!   whose key field changed since it was tracked fails with `KeyChanged`.
//! - Flush order is staging order: each state change moves the entry to the
//!   end of the queue.
//! - Commit applies state transitions only after the store transaction
//!   commits; a failed or cancelled commit leaves the table untouched.
//! - Caller code (predicates, comparators, includes) never runs while the
//!   session state is borrowed.
//! - After `close` every operation returns `RepoError::Disposed`.

mod entry;
pub(crate) mod sql;

use self::entry::TrackedObject;
use crate::model::entity::{Entity, EntityKey};
use crate::model::tracked::{Tracked, TrackingState};
use crate::repo::error::{store_command, RepoError, RepoResult};
use log::{debug, error, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Identity {
    type_id: TypeId,
    key: EntityKey,
}

impl Identity {
    fn of<T: Entity>(key: EntityKey) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            key,
        }
    }
}

struct Entry {
    state: TrackingState,
    /// Position in staging order; renewed on every move to a new state.
    seq: u64,
    instance: usize,
    object: Rc<dyn TrackedObject>,
}

/// Read-only view of one tracked entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub entity: &'static str,
    pub key: EntityKey,
    pub state: TrackingState,
}

struct Pending {
    identity: Identity,
    state: TrackingState,
    object: Rc<dyn TrackedObject>,
}

impl Pending {
    fn describe(&self, verb: &str) -> String {
        format!(
            "{verb} of {} {}",
            self.object.entity_name(),
            self.identity.key
        )
    }
}

struct SessionState {
    conn: Connection,
    entries: HashMap<Identity, Entry>,
    /// Instance address to the identity it is tracked under.
    instances: HashMap<usize, Identity>,
    next_seq: u64,
}

impl SessionState {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn track<T: Entity>(&mut self, identity: Identity, state: TrackingState, handle: &Tracked<T>) {
        let seq = self.next_seq();
        let instance = handle.instance_id();
        self.instances.insert(instance, identity.clone());
        self.entries.insert(
            identity,
            Entry {
                state,
                seq,
                instance,
                object: Rc::new(handle.clone()),
            },
        );
    }

    fn evict(&mut self, identity: &Identity) -> bool {
        match self.entries.remove(identity) {
            Some(entry) => {
                self.instances.remove(&entry.instance);
                true
            }
            None => false,
        }
    }

    /// Identity for staging `handle`. An instance already tracked under a
    /// different key is rejected.
    fn identity_of<T: Entity>(&self, handle: &Tracked<T>) -> RepoResult<Identity> {
        let current = Identity::of::<T>(handle.borrow().key());
        match self.instances.get(&handle.instance_id()) {
            Some(tracked) if *tracked != current => Err(RepoError::KeyChanged {
                entity: T::entity_name(),
                tracked: tracked.key.clone(),
                current: current.key,
            }),
            _ => Ok(current),
        }
    }

    /// Identity `handle` is tracked under, falling back to its current key.
    fn tracked_identity_of<T: Entity>(&self, handle: &Tracked<T>) -> Identity {
        match self.instances.get(&handle.instance_id()) {
            Some(identity) => identity.clone(),
            None => Identity::of::<T>(handle.borrow().key()),
        }
    }

    fn canonical<T: Entity>(&self, identity: &Identity) -> RepoResult<Option<Tracked<T>>> {
        match self.entries.get(identity) {
            Some(entry) => downcast::<T>(entry).map(Some),
            None => Ok(None),
        }
    }

    fn set_state(&mut self, identity: &Identity, state: TrackingState) {
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.state = state;
        }
    }

    /// Moves an entry to a staged state. A state change takes a fresh
    /// position at the end of the staging order.
    fn stage(&mut self, identity: &Identity, state: TrackingState) {
        let seq = self.next_seq;
        let Some(entry) = self.entries.get_mut(identity) else {
            return;
        };
        if entry.state != state {
            entry.state = state;
            entry.seq = seq;
            self.next_seq += 1;
        }
    }

    /// Staged entries in staging order.
    fn pending(&self) -> Vec<Pending> {
        let mut staged = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.state.is_pending())
            .collect::<Vec<_>>();
        staged.sort_by_key(|(_, entry)| entry.seq);
        staged
            .into_iter()
            .map(|(identity, entry)| Pending {
                identity: identity.clone(),
                state: entry.state,
                object: Rc::clone(&entry.object),
            })
            .collect()
    }
}

fn downcast<T: Entity>(entry: &Entry) -> RepoResult<Tracked<T>> {
    entry
        .object
        .as_any()
        .downcast_ref::<Tracked<T>>()
        .cloned()
        .ok_or_else(|| {
            RepoError::Configuration(format!(
                "tracked entry for `{}` holds a different entity type",
                T::entity_name()
            ))
        })
}

/// The one connection and tracking table shared by every repository of a
/// unit of work.
pub struct Session {
    state: RefCell<Option<SessionState>>,
}

impl Session {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            state: RefCell::new(Some(SessionState {
                conn,
                entries: HashMap::new(),
                instances: HashMap::new(),
                next_seq: 0,
            })),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().is_none()
    }

    pub(crate) fn ensure_open(&self) -> RepoResult<()> {
        if self.is_closed() {
            return Err(RepoError::Disposed);
        }
        Ok(())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> RepoResult<R>) -> RepoResult<R> {
        let mut guard = self.state.borrow_mut();
        let state = guard.as_mut().ok_or(RepoError::Disposed)?;
        f(state)
    }

    /// Checks that the table behind `T` exists with every mapped column.
    pub(crate) fn ensure_table<T: Entity>(&self) -> RepoResult<()> {
        self.with_state(|state| {
            let columns = table_columns(&state.conn, T::TABLE)?;
            if columns.is_empty() {
                return Err(RepoError::Configuration(format!(
                    "table `{}` required by `{}` does not exist",
                    T::TABLE,
                    T::entity_name()
                )));
            }

            for column in std::iter::once(T::KEY_COLUMN).chain(T::COLUMNS.iter().copied()) {
                if !columns.iter().any(|existing| existing == column) {
                    return Err(RepoError::Configuration(format!(
                        "table `{}` has no column `{column}` required by `{}`",
                        T::TABLE,
                        T::entity_name()
                    )));
                }
            }

            Ok(())
        })
    }

    /// Loads every stored row of `T`, ordered by key. Does not track.
    pub(crate) fn fetch_all<T: Entity>(&self) -> RepoResult<Vec<T>> {
        self.fetch_where::<T>(None, &[])
    }

    /// Loads stored rows of `T` matching an optional SQL condition, ordered
    /// by key. Does not track.
    pub(crate) fn fetch_where<T: Entity>(
        &self,
        condition: Option<&str>,
        params: &[Value],
    ) -> RepoResult<Vec<T>> {
        let statement = match condition {
            Some(condition) => sql::select_where::<T>(condition),
            None => sql::select_all::<T>(),
        };
        self.with_state(|state| {
            let mut stmt = state.conn.prepare_cached(&statement)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut entities = Vec::new();
            while let Some(row) = rows.next()? {
                entities.push(T::from_row(row)?);
            }
            Ok(entities)
        })
    }

    /// Loads one stored row of `T`. Does not track.
    pub(crate) fn fetch_by_key<T: Entity>(&self, key: &EntityKey) -> RepoResult<Option<T>> {
        self.with_state(|state| {
            let mut stmt = state.conn.prepare_cached(&sql::select_by_key::<T>())?;
            let entity = stmt
                .query_row([key], |row| T::from_row(row))
                .optional()?;
            Ok(entity)
        })
    }

    /// Identity-map lookup in any tracked state.
    pub(crate) fn lookup<T: Entity>(&self, key: &EntityKey) -> RepoResult<Option<Tracked<T>>> {
        self.with_state(|state| state.canonical::<T>(&Identity::of::<T>(key.clone())))
    }

    /// Maps freshly loaded rows onto tracked handles. Rows whose identity is
    /// already tracked resolve to the existing handle and keep its in-memory
    /// values; the rest start tracking as `Unchanged`.
    pub(crate) fn resolve_all<T: Entity>(&self, rows: Vec<T>) -> RepoResult<Vec<Tracked<T>>> {
        self.with_state(|state| {
            let mut resolved = Vec::with_capacity(rows.len());
            for entity in rows {
                let identity = Identity::of::<T>(entity.key());
                let handle = match state.canonical::<T>(&identity)? {
                    Some(existing) => existing,
                    None => {
                        let handle = Tracked::new(entity);
                        state.track(identity, TrackingState::Unchanged, &handle);
                        handle
                    }
                };
                resolved.push(handle);
            }
            Ok(resolved)
        })
    }

    pub(crate) fn stage_added<T: Entity>(&self, handle: Tracked<T>) -> RepoResult<Tracked<T>> {
        self.with_state(|state| {
            let identity = state.identity_of(&handle)?;
            if state.entries.contains_key(&identity) {
                return Err(RepoError::AlreadyTracked {
                    entity: T::entity_name(),
                    key: identity.key,
                });
            }

            debug!(
                "event=entity_staged module=session status=ok entity={} key={} state=added",
                T::entity_name(),
                identity.key
            );
            state.track(identity, TrackingState::Added, &handle);
            Ok(handle)
        })
    }

    /// Attaches when needed and marks `Modified`. A different instance with a
    /// tracked identity is merged into the tracked instance, whose handle is
    /// returned. `Added` entries stay `Added`.
    pub(crate) fn stage_modified<T: Entity>(&self, handle: Tracked<T>) -> RepoResult<Tracked<T>> {
        self.with_state(|state| {
            let identity = state.identity_of(&handle)?;
            let (canonical, staged) = match state.canonical::<T>(&identity)? {
                Some(canonical) => {
                    if !Tracked::ptr_eq(&canonical, &handle) {
                        canonical.replace(handle.snapshot());
                    }
                    let current = state
                        .entries
                        .get(&identity)
                        .map_or(TrackingState::Detached, |entry| entry.state);
                    let staged = if current == TrackingState::Added {
                        TrackingState::Added
                    } else {
                        TrackingState::Modified
                    };
                    state.stage(&identity, staged);
                    (canonical, staged)
                }
                None => {
                    state.track(identity.clone(), TrackingState::Modified, &handle);
                    (handle, TrackingState::Modified)
                }
            };

            debug!(
                "event=entity_staged module=session status=ok entity={} key={} state={staged}",
                T::entity_name(),
                identity.key
            );
            Ok(canonical)
        })
    }

    /// Attaches when needed and marks `Deleted`. An `Added` entry was never
    /// persisted and is evicted instead.
    pub(crate) fn stage_deleted<T: Entity>(&self, handle: Tracked<T>) -> RepoResult<()> {
        self.with_state(|state| {
            let identity = state.identity_of(&handle)?;
            let current = state.entries.get(&identity).map(|entry| entry.state);
            let staged = match current {
                Some(TrackingState::Added) => {
                    state.evict(&identity);
                    TrackingState::Detached
                }
                Some(_) => {
                    state.stage(&identity, TrackingState::Deleted);
                    TrackingState::Deleted
                }
                None => {
                    state.track(identity.clone(), TrackingState::Deleted, &handle);
                    TrackingState::Deleted
                }
            };

            debug!(
                "event=entity_staged module=session status=ok entity={} key={} state={staged}",
                T::entity_name(),
                identity.key
            );
            Ok(())
        })
    }

    /// Stops tracking the identity this instance is tracked under, even
    /// when its key field was edited since.
    pub(crate) fn detach<T: Entity>(&self, handle: &Tracked<T>) -> RepoResult<()> {
        self.with_state(|state| {
            let identity = state.tracked_identity_of(handle);
            if !state.evict(&identity) {
                return Err(RepoError::DetachedEntity {
                    entity: T::entity_name(),
                    key: identity.key,
                });
            }
            debug!(
                "event=entity_detached module=session status=ok entity={} key={}",
                T::entity_name(),
                identity.key
            );
            Ok(())
        })
    }

    /// State of this exact instance. A different instance sharing a tracked
    /// identity reports `Detached`.
    pub(crate) fn state_of<T: Entity>(&self, handle: &Tracked<T>) -> RepoResult<TrackingState> {
        self.with_state(|state| {
            let identity = state.identity_of(handle)?;
            match state.canonical::<T>(&identity)? {
                Some(canonical) if Tracked::ptr_eq(&canonical, handle) => Ok(state
                    .entries
                    .get(&identity)
                    .map_or(TrackingState::Detached, |entry| entry.state)),
                _ => Ok(TrackingState::Detached),
            }
        })
    }

    /// Reloads one tracked identity from the store and resets it to
    /// `Unchanged`. An edited key field is restored along with the rest.
    pub(crate) fn reload<T: Entity>(&self, handle: &Tracked<T>) -> RepoResult<()> {
        self.with_state(|state| {
            let identity = state.tracked_identity_of(handle);
            let object = match state.entries.get(&identity) {
                Some(entry) => Rc::clone(&entry.object),
                None => {
                    return Err(RepoError::DetachedEntity {
                        entity: T::entity_name(),
                        key: identity.key,
                    });
                }
            };

            if object.reload(&state.conn, &identity.key)? {
                state.set_state(&identity, TrackingState::Unchanged);
                return Ok(());
            }

            state.evict(&identity);
            Err(RepoError::ReloadTargetMissing {
                entities: vec![(T::entity_name(), identity.key)],
            })
        })
    }

    pub(crate) fn entries(&self) -> RepoResult<Vec<EntryInfo>> {
        self.with_state(|state| {
            let mut entries = state.entries.iter().collect::<Vec<_>>();
            entries.sort_by_key(|(_, entry)| entry.seq);
            Ok(entries
                .into_iter()
                .map(|(identity, entry)| EntryInfo {
                    entity: entry.object.entity_name(),
                    key: identity.key.clone(),
                    state: entry.state,
                })
                .collect())
        })
    }

    pub(crate) fn has_changes(&self) -> RepoResult<bool> {
        self.with_state(|state| {
            Ok(state
                .entries
                .values()
                .any(|entry| entry.state.is_pending()))
        })
    }

    /// Flushes every staged entry in one store transaction.
    pub(crate) fn save_changes(&self, cancel: &CancellationToken) -> RepoResult<usize> {
        self.with_state(|state| {
            let pending = state.pending();
            if pending.is_empty() {
                debug!("event=save_changes module=session status=ok pending=0 affected=0");
                return Ok(0);
            }

            let started_at = Instant::now();
            let affected = match flush(&state.conn, &pending, cancel) {
                Ok(affected) => affected,
                Err(err) => {
                    error!(
                        "event=save_changes module=session status=error pending={} duration_ms={} error={}",
                        pending.len(),
                        started_at.elapsed().as_millis(),
                        err
                    );
                    return Err(err);
                }
            };

            for item in &pending {
                if item.state == TrackingState::Deleted {
                    state.evict(&item.identity);
                } else {
                    state.set_state(&item.identity, TrackingState::Unchanged);
                }
            }

            info!(
                "event=save_changes module=session status=ok pending={} affected={affected} duration_ms={}",
                pending.len(),
                started_at.elapsed().as_millis()
            );
            Ok(affected)
        })
    }

    /// Evicts `Added` entries and reloads `Modified`/`Deleted` ones.
    pub(crate) fn reject_changes(&self, cancel: &CancellationToken) -> RepoResult<()> {
        self.with_state(|state| {
            let started_at = Instant::now();
            let mut detached = 0;
            let mut reloaded = 0;
            let mut missing = Vec::new();

            for item in state.pending() {
                if cancel.is_cancelled() {
                    info!(
                        "event=reject_changes module=session status=cancelled detached={detached} reloaded={reloaded}"
                    );
                    return Err(RepoError::Cancelled);
                }

                match item.state {
                    TrackingState::Added => {
                        state.evict(&item.identity);
                        detached += 1;
                    }
                    TrackingState::Modified | TrackingState::Deleted => {
                        if item.object.reload(&state.conn, &item.identity.key)? {
                            state.set_state(&item.identity, TrackingState::Unchanged);
                            reloaded += 1;
                        } else {
                            state.evict(&item.identity);
                            missing.push((item.object.entity_name(), item.identity.key.clone()));
                        }
                    }
                    TrackingState::Unchanged | TrackingState::Detached => {}
                }
            }

            info!(
                "event=reject_changes module=session status=ok detached={detached} reloaded={reloaded} missing={} duration_ms={}",
                missing.len(),
                started_at.elapsed().as_millis()
            );

            if !missing.is_empty() {
                return Err(RepoError::ReloadTargetMissing { entities: missing });
            }
            Ok(())
        })
    }

    /// Runs a raw command outside the tracking protocol.
    pub(crate) fn execute(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> RepoResult<usize> {
        self.with_state(|state| {
            if cancel.is_cancelled() {
                return Err(RepoError::Cancelled);
            }
            let affected = state
                .conn
                .execute(sql, params_from_iter(params.iter()))
                .map_err(|source| store_command("raw command", source))?;
            debug!("event=execute_sql module=session status=ok affected={affected}");
            Ok(affected)
        })
    }

    /// Discards tracking and closes the connection. Returns `false` when the
    /// session was already closed.
    pub(crate) fn close(&self) -> RepoResult<bool> {
        let taken = self.state.borrow_mut().take();
        let Some(SessionState { conn, entries, .. }) = taken else {
            return Ok(false);
        };

        let discarded = entries.len();
        drop(entries);
        conn.close()
            .map_err(|(_, source)| store_command("connection close", source))?;

        info!("event=session_close module=session status=ok discarded_entries={discarded}");
        Ok(true)
    }
}

fn flush(conn: &Connection, pending: &[Pending], cancel: &CancellationToken) -> RepoResult<usize> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|source| store_command("transaction begin", source))?;

    let mut affected = 0;
    for item in pending {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }

        let key = &item.identity.key;
        let (verb, result) = match item.state {
            TrackingState::Added => ("insert", item.object.insert(&tx, key)),
            TrackingState::Modified => ("update", item.object.update(&tx, key)),
            TrackingState::Deleted => ("delete", item.object.delete(&tx, key)),
            TrackingState::Unchanged | TrackingState::Detached => continue,
        };
        let rows = result.map_err(|source| store_command(item.describe(verb), source))?;

        if rows == 0 {
            return Err(RepoError::ConcurrencyConflict {
                entity: item.object.entity_name(),
                key: key.clone(),
            });
        }
        affected += rows;
    }

    if cancel.is_cancelled() {
        return Err(RepoError::Cancelled);
    }
    tx.commit()
        .map_err(|source| store_command("transaction commit", source))?;
    Ok(affected)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", sql::quote(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}
