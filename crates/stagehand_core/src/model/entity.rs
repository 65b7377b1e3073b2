//! Entity contract.
//!
//! An entity maps to exactly one table: a primary key column plus an ordered
//! list of value columns. `values()` must yield one bind value per entry in
//! `COLUMNS`, in the same order.

use rusqlite::types::{ToSql, ToSqlOutput, Value};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use uuid::Uuid;

/// Primary key value of one entity.
///
/// Kept to the two SQLite key affinities so it can be hashed and used as an
/// identity-map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Integer(i64),
    Text(String),
}

impl EntityKey {
    /// Owned bind value for this key.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Integer(value) => Value::Integer(*value),
            Self::Text(value) => Value::Text(value.clone()),
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl ToSql for EntityKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Integer(value) => Ok(ToSqlOutput::from(*value)),
            Self::Text(value) => Ok(ToSqlOutput::from(value.as_str())),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for EntityKey {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for EntityKey {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// UUID keys are stored in their hyphenated text form.
impl From<Uuid> for EntityKey {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

/// A record that can be tracked by a session and persisted to one table.
///
/// Fields that are not listed in `COLUMNS` (for example eagerly loaded
/// related collections) are never written by the session.
pub trait Entity: Clone + Debug + 'static {
    /// Table holding this entity.
    const TABLE: &'static str;
    /// Primary key column.
    const KEY_COLUMN: &'static str;
    /// Value columns written on insert and update, in `values()` order.
    const COLUMNS: &'static [&'static str];

    /// Identity of this record.
    fn key(&self) -> EntityKey;

    /// Bind values for `COLUMNS`.
    fn values(&self) -> Vec<Value>;

    /// Builds a record from a row selected as `KEY_COLUMN, COLUMNS...`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Short type label used in errors and log events.
    fn entity_name() -> &'static str {
        Self::TABLE
    }
}
