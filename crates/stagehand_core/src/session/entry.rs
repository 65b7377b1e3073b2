//! Type-erased tracked entries.
//!
//! The tracking table stores handles of many entity types side by side.
//! `TrackedObject` is the slice of `Entity` behavior commit and rollback
//! need without knowing the concrete type.

use super::sql;
use crate::model::entity::{Entity, EntityKey};
use crate::model::tracked::Tracked;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::any::Any;

pub(crate) trait TrackedObject {
    fn as_any(&self) -> &dyn Any;
    fn entity_name(&self) -> &'static str;
    fn insert(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<usize>;
    fn update(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<usize>;
    fn delete(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<usize>;
    /// Overwrites the in-memory value with the stored row. Returns `false`
    /// when the row no longer exists.
    fn reload(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<bool>;
}

impl<T: Entity> TrackedObject for Tracked<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn entity_name(&self) -> &'static str {
        T::entity_name()
    }

    fn insert(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<usize> {
        let mut bind = vec![key.to_value()];
        bind.extend(self.borrow().values());
        let mut stmt = conn.prepare_cached(&sql::insert::<T>())?;
        stmt.execute(params_from_iter(bind))
    }

    fn update(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<usize> {
        let mut bind = if T::COLUMNS.is_empty() {
            Vec::new()
        } else {
            self.borrow().values()
        };
        bind.push(key.to_value());
        let mut stmt = conn.prepare_cached(&sql::update::<T>())?;
        stmt.execute(params_from_iter(bind))
    }

    fn delete(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<usize> {
        let mut stmt = conn.prepare_cached(&sql::delete::<T>())?;
        stmt.execute([key])
    }

    fn reload(&self, conn: &Connection, key: &EntityKey) -> rusqlite::Result<bool> {
        let fresh = {
            let mut stmt = conn.prepare_cached(&sql::select_by_key::<T>())?;
            let row = stmt.query_row([key], |row| T::from_row(row)).optional()?;
            row
        };
        match fresh {
            Some(entity) => {
                self.replace(entity);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
