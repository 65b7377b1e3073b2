//! Schema migration executor for caller-owned entity tables.
//!
//! # Responsibility
//! - Validate that supplied migrations are strictly increasing.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A database at a version newer than the supplied list is rejected.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One schema step owned by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: u32, sql: &'static str) -> Self {
        Self { version, sql }
    }
}

/// Returns the latest version in `migrations`, or `0` when empty.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |migration| migration.version)
}

/// Reads `PRAGMA user_version`.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection, migrations: &[Migration]) -> DbResult<()> {
    ensure_monotonic(migrations)?;

    let current = current_version(conn)?;
    let latest = latest_version(migrations);

    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }

    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in migrations {
        if migration.version <= current {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    info!("event=db_migrate module=db status=ok from_version={current} to_version={latest}");
    Ok(())
}

fn ensure_monotonic(migrations: &[Migration]) -> DbResult<()> {
    let mut previous = 0;
    for migration in migrations {
        if migration.version <= previous {
            return Err(DbError::NonMonotonicMigration {
                previous,
                version: migration.version,
            });
        }
        previous = migration.version;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, current_version, latest_version, Migration};
    use crate::db::DbError;
    use rusqlite::Connection;

    const STEPS: &[Migration] = &[
        Migration::new(1, "CREATE TABLE a (id INTEGER PRIMARY KEY);"),
        Migration::new(2, "CREATE TABLE b (id INTEGER PRIMARY KEY);"),
    ];

    #[test]
    fn latest_version_of_empty_list_is_zero() {
        assert_eq!(latest_version(&[]), 0);
        assert_eq!(latest_version(STEPS), 2);
    }

    #[test]
    fn applies_only_pending_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn, &STEPS[..1]).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);

        apply_migrations(&mut conn, STEPS).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn rejects_non_increasing_versions() {
        let mut conn = Connection::open_in_memory().unwrap();
        let steps = [
            Migration::new(2, "SELECT 1;"),
            Migration::new(2, "SELECT 1;"),
        ];
        let err = apply_migrations(&mut conn, &steps).unwrap_err();
        assert!(matches!(
            err,
            DbError::NonMonotonicMigration {
                previous: 2,
                version: 2
            }
        ));
    }

    #[test]
    fn failed_step_leaves_version_untouched() {
        let mut conn = Connection::open_in_memory().unwrap();
        let steps = [
            Migration::new(1, "CREATE TABLE ok (id INTEGER PRIMARY KEY);"),
            Migration::new(2, "THIS IS NOT SQL;"),
        ];
        assert!(apply_migrations(&mut conn, &steps).is_err());
        assert_eq!(current_version(&conn).unwrap(), 0);
    }
}
