//! Database handle: configuration, connection pool and scope factory.

use super::config::{DatabaseConfig, DatabaseLocation};
use super::open::open_configured;
use super::pool::ConnectionPool;
use super::scope::{Scope, ScopeSource};
use crate::error::RepoResult;
use log::info;
use std::path::Path;

/// Shared handle to one backing store.
///
/// `Database` is `Send + Sync`; share it behind an `Arc` across threads. Each
/// scope checks out its own connection, so concurrent callers never share a
/// connection or a transaction.
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Opens a database described by `config`.
    ///
    /// A first connection is opened eagerly so bad paths, unsupported
    /// catalog versions and invalid configuration fail here.
    pub fn open(config: DatabaseConfig) -> RepoResult<Self> {
        config.validate()?;
        if let DatabaseLocation::File { .. } = config.location {
            // Pooled connections only report bootstrap failures as strings.
            drop(open_configured(&config)?);
        }
        let pool = ConnectionPool::new(config)?;
        info!(
            "event=database_open module=db status=ok pool_size={} behavior={}",
            pool.config().effective_pool_size(),
            pool.config().scope_behavior.as_str()
        );
        Ok(Self { pool })
    }

    /// Opens a private in-memory database with default settings.
    pub fn open_in_memory() -> RepoResult<Self> {
        Self::open(DatabaseConfig::in_memory())
    }

    /// Opens (or creates) a file database with default settings.
    pub fn open_path(path: impl AsRef<Path>) -> RepoResult<Self> {
        Self::open(DatabaseConfig::file(path.as_ref()))
    }

    pub fn config(&self) -> &DatabaseConfig {
        self.pool.config()
    }

    /// Opens a caller-owned transactional scope.
    ///
    /// Blocks until a connection is free or the acquire timeout elapses.
    pub fn begin(&self) -> RepoResult<Scope<'_>> {
        let conn = self.pool.acquire()?;
        let config = self.pool.config();
        Scope::begin(conn, config.scope_behavior, config.statement_timeout())
    }

    /// Runs `op` in a fresh scope, committing on success.
    pub fn transaction<T, F>(&self, op: F) -> RepoResult<T>
    where
        F: FnOnce(&Scope<'_>) -> RepoResult<T>,
    {
        self.within(op)
    }
}

impl ScopeSource for Database {
    fn within<T, F>(&self, op: F) -> RepoResult<T>
    where
        F: FnOnce(&Scope<'_>) -> RepoResult<T>,
    {
        let scope = self.begin()?;
        match op(&scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(err) => {
                scope.abort_in_place(err.code());
                Err(err)
            }
        }
    }
}
