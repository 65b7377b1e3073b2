#![allow(dead_code)]

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row};
use stagehand_core::{
    Entity, EntityKey, EntitySet, Migration, Query, RepoResult, Repository, SessionOptions,
    Tracked, UnitOfWork,
};
use std::path::{Path, PathBuf};

pub const SCHEMA: &[Migration] = &[
    Migration::new(
        1,
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT
        );",
    ),
    Migration::new(
        2,
        "CREATE TABLE posts (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id),
            title TEXT NOT NULL
        );",
    ),
];

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    /// Filled by include steps; not a column.
    pub posts: Vec<Post>,
}

impl User {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            email: None,
            posts: Vec::new(),
        }
    }
}

impl Entity for User {
    const TABLE: &'static str = "users";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["name", "email"];

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            self.email.clone().map_or(Value::Null, Value::Text),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            posts: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
}

impl Post {
    pub fn new(id: i64, user_id: i64, title: &str) -> Self {
        Self {
            id,
            user_id,
            title: title.to_string(),
        }
    }
}

impl Entity for Post {
    const TABLE: &'static str = "posts";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &["user_id", "title"];

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.user_id),
            Value::Text(self.title.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
        })
    }
}

/// Entity whose table is never created.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub id: i64,
}

impl Entity for AuditRecord {
    const TABLE: &'static str = "audit_records";
    const KEY_COLUMN: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &[];

    fn key(&self) -> EntityKey {
        EntityKey::from(self.id)
    }

    fn values(&self) -> Vec<Value> {
        Vec::new()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self { id: row.get("id")? })
    }
}

/// Custom repository adding a domain query on top of the generic set.
pub struct UserRepository {
    users: EntitySet<User>,
}

impl UserRepository {
    pub fn find_by_name(&self, name: &str) -> RepoResult<Option<Tracked<User>>> {
        let name = name.to_string();
        self.find(Query::new().filter(move |user: &User| user.name == name))
    }
}

impl Repository for UserRepository {
    type Entity = User;

    fn try_new(entities: EntitySet<User>) -> RepoResult<Self> {
        Ok(Self { users: entities })
    }

    fn entities(&self) -> &EntitySet<User> {
        &self.users
    }
}

pub fn open_uow() -> UnitOfWork {
    UnitOfWork::open(&SessionOptions::in_memory(), SCHEMA).unwrap()
}

/// Inserts a user row behind the session's back.
pub fn seed_user(uow: &UnitOfWork, id: i64, name: &str) {
    uow.execute_sql_command(
        "INSERT INTO users (id, name) VALUES (?1, ?2);",
        &[Value::Integer(id), Value::Text(name.to_string())],
    )
    .unwrap();
}

pub fn seed_post(uow: &UnitOfWork, id: i64, user_id: i64, title: &str) {
    uow.execute_sql_command(
        "INSERT INTO posts (id, user_id, title) VALUES (?1, ?2, ?3);",
        &[
            Value::Integer(id),
            Value::Integer(user_id),
            Value::Text(title.to_string()),
        ],
    )
    .unwrap();
}

/// File-backed unit of work so tests can inspect the store through a
/// second connection.
pub fn open_file_uow(dir: &tempfile::TempDir) -> (UnitOfWork, PathBuf) {
    let path = dir.path().join("stagehand.db");
    let uow = UnitOfWork::open(&SessionOptions::file(&path), SCHEMA).unwrap();
    (uow, path)
}

/// Reads a user's stored name without going through any session.
pub fn stored_user_name(path: &Path, id: i64) -> Option<String> {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT name FROM users WHERE id = ?1;", [id], |row| {
        row.get(0)
    })
    .optional()
    .unwrap()
}

pub fn stored_count(path: &Path, table: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}
