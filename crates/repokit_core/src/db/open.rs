//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas and modules required by the engine.
//! - Trigger catalog migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have the `rarray` module loaded for `IN` binds.
//! - File connections run in WAL mode.
//! - Returned connections have migrations fully applied.

use super::config::{DatabaseConfig, DatabaseLocation};
use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi, Connection};
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file with default settings and applies all
/// pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_configured(&DatabaseConfig::file(path.as_ref()))
}

/// Opens an in-memory SQLite database with default settings and applies all
/// pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_configured(&DatabaseConfig::in_memory())
}

/// Opens one standalone connection described by `config`.
pub(crate) fn open_configured(config: &DatabaseConfig) -> DbResult<Connection> {
    match &config.location {
        DatabaseLocation::Memory => open_logged(
            "memory",
            config.busy_timeout(),
            false,
            Connection::open_in_memory,
        ),
        DatabaseLocation::File { path } => {
            open_logged("file", config.busy_timeout(), true, || Connection::open(path))
        }
    }
}

/// Connection manager whose connections run the same bootstrap as
/// `open_configured`.
pub(crate) fn connection_manager(config: &DatabaseConfig) -> SqliteConnectionManager {
    let busy_timeout = config.busy_timeout();
    let (manager, mode, wal) = match &config.location {
        DatabaseLocation::Memory => (SqliteConnectionManager::memory(), "memory", false),
        DatabaseLocation::File { path } => (SqliteConnectionManager::file(path), "file", true),
    };
    manager.with_init(move |conn| {
        bootstrap_logged(conn, mode, busy_timeout, wal, Instant::now()).map_err(|err| match err {
            DbError::Sqlite(err) => err,
            other => rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_ERROR),
                Some(other.to_string()),
            ),
        })
    })
}

fn open_logged(
    mode: &str,
    busy_timeout: Duration,
    wal: bool,
    opener: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match opener() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    bootstrap_logged(&mut conn, mode, busy_timeout, wal, started_at)?;
    Ok(conn)
}

fn bootstrap_logged(
    conn: &mut Connection,
    mode: &str,
    busy_timeout: Duration,
    wal: bool,
    started_at: Instant,
) -> DbResult<()> {
    match bootstrap_connection(conn, busy_timeout, wal) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={} duration_ms={}",
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(())
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, busy_timeout: Duration, wal: bool) -> DbResult<()> {
    // LIKE-based comparators are case-sensitive unless IgnoreCase folds both sides.
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA case_sensitive_like = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    if wal {
        // journal_mode reports the resulting mode as a row.
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }
    rusqlite::vtab::array::load_module(conn)?;
    apply_migrations(conn)?;
    Ok(())
}
