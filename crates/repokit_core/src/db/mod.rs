//! SQLite storage bootstrap, connection pooling and transactional scopes.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the repository engine.
//! - Apply internal catalog migrations in deterministic order.
//! - Hand out pooled connections wrapped in explicit transactional scopes.
//!
//! # Invariants
//! - Catalog version is tracked via `PRAGMA user_version`.
//! - A connection is used by at most one scope at a time.
//! - Repository code never touches a connection outside of a `Scope`.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod config;
pub mod migrations;
mod database;
mod open;
mod pool;
mod scope;

pub use config::{DatabaseConfig, DatabaseLocation, ScopeBehavior};
pub use database::Database;
pub use open::{open_db, open_db_in_memory};
pub use scope::{Scope, ScopeSource, ScopeState};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    InvalidConfig(String),
    Pool(r2d2::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "catalog schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidConfig(message) => write!(f, "invalid database config: {message}"),
            Self::Pool(err) => write!(f, "connection pool: {err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
            Self::InvalidConfig(_) => None,
            Self::Pool(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
