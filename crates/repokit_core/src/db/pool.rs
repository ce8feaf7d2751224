//! Bounded blocking pool of bootstrapped SQLite connections.
//!
//! # Invariants
//! - At most `effective_pool_size` connections exist at once.
//! - Every pooled connection ran the bootstrap in `open` before first use.
//! - The single in-memory connection lives as long as the pool.

use super::config::{DatabaseConfig, DatabaseLocation};
use super::open::connection_manager;
use super::DbError;
use crate::error::{RepoError, RepoResult};
use log::{debug, warn};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub(crate) type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

pub(crate) struct ConnectionPool {
    config: DatabaseConfig,
    inner: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Builds the pool. Expects a validated config.
    pub(crate) fn new(config: DatabaseConfig) -> RepoResult<Self> {
        let builder = Pool::builder()
            .max_size(config.effective_pool_size())
            .connection_timeout(config.acquire_timeout());
        let builder = match config.location {
            // Each `:memory:` connection is a separate database.
            DatabaseLocation::Memory => builder
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None),
            DatabaseLocation::File { .. } => builder.min_idle(Some(0)),
        };

        let inner = builder
            .build(connection_manager(&config))
            .map_err(DbError::Pool)?;
        debug!(
            "event=pool_open module=db status=ok max_size={}",
            inner.max_size()
        );
        Ok(Self { config, inner })
    }

    /// Checks out one connection, blocking up to the acquire timeout.
    pub(crate) fn acquire(&self) -> RepoResult<PooledConnection> {
        self.inner.get().map_err(|err| {
            let timeout_ms = self.config.acquire_timeout().as_millis();
            warn!(
                "event=pool_acquire module=db status=error error_code=acquire_timeout max_size={} timeout_ms={} error={}",
                self.inner.max_size(),
                timeout_ms,
                err
            );
            RepoError::Timeout(format!(
                "no database connection became available within {timeout_ms} ms"
            ))
        })
    }

    pub(crate) fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}
