//! Connection bootstrap for SQLite sessions.
//!
//! # Invariants
//! - Returned connections carry the pragmas requested by `SessionOptions`.
//! - Returned connections have every supplied migration applied.

use super::migrations::apply_migrations;
use super::{DbResult, Migration, SessionOptions};
use log::{error, info};
use rusqlite::Connection;
use std::time::Instant;

/// Opens the database described by `options` and applies pending migrations.
///
/// # Side effects
/// - Creates the database file when it does not exist.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(options: &SessionOptions, migrations: &[Migration]) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = options.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match options.path.as_deref() {
        Some(path) => Connection::open(path),
        None => Connection::open_in_memory(),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, options, migrations) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    options: &SessionOptions,
    migrations: &[Migration],
) -> DbResult<()> {
    let foreign_keys = if options.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))?;
    conn.busy_timeout(options.busy_timeout())?;
    apply_migrations(conn, migrations)?;
    Ok(())
}
