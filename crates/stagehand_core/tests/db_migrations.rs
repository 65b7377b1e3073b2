mod common;

use common::SCHEMA;
use rusqlite::Connection;
use stagehand_core::db::migrations::latest_version;
use stagehand_core::{open_db, DbError, Migration, RepoError, SessionOptions, UnitOfWork};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db(&SessionOptions::in_memory(), SCHEMA).unwrap();

    assert_eq!(schema_version(&conn), latest_version(SCHEMA));
    assert_table_exists(&conn, "users");
    assert_table_exists(&conn, "posts");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let options = SessionOptions::file(dir.path().join("stagehand.db"));

    let conn_first = open_db(&options, SCHEMA).unwrap();
    conn_first
        .execute("INSERT INTO users (id, name) VALUES (1, 'ada');", [])
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&options, SCHEMA).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version(SCHEMA));
    let users: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM users;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(users, 1);
}

#[test]
fn later_migrations_apply_on_top_of_existing_schema() {
    let dir = tempfile::tempdir().unwrap();
    let options = SessionOptions::file(dir.path().join("grow.db"));

    drop(open_db(&options, &SCHEMA[..1]).unwrap());
    let conn = open_db(&options, SCHEMA).unwrap();

    assert_eq!(schema_version(&conn), 2);
    assert_table_exists(&conn, "posts");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&SessionOptions::file(&path), SCHEMA).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version(SCHEMA));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn non_monotonic_migrations_are_rejected() {
    let broken = [Migration::new(2, "SELECT 1;"), Migration::new(1, "SELECT 1;")];

    let err = open_db(&SessionOptions::in_memory(), &broken).unwrap_err();
    assert!(matches!(
        err,
        DbError::NonMonotonicMigration {
            previous: 2,
            version: 1
        }
    ));
}

#[test]
fn failing_migration_surfaces_through_unit_of_work_open() {
    let broken = [Migration::new(1, "CREATE TABLE broken (;")];

    let err = UnitOfWork::open(&SessionOptions::in_memory(), &broken)
        .err()
        .unwrap();
    assert!(matches!(err, RepoError::Db(DbError::Sqlite(_))));
}

#[test]
fn foreign_keys_follow_session_options() {
    let enforced = open_db(&SessionOptions::in_memory(), SCHEMA).unwrap();
    assert_eq!(foreign_keys(&enforced), 1);

    let relaxed = SessionOptions {
        foreign_keys: false,
        ..SessionOptions::in_memory()
    };
    let conn = open_db(&relaxed, SCHEMA).unwrap();
    assert_eq!(foreign_keys(&conn), 0);
    conn.execute(
        "INSERT INTO posts (id, user_id, title) VALUES (1, 42, 'orphan');",
        [],
    )
    .unwrap();
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn foreign_keys(conn: &Connection) -> i64 {
    conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
