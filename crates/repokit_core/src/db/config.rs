//! Database handle configuration.
//!
//! # Responsibility
//! - Describe where the backing store lives and how connections behave.
//! - Provide defaults suitable for tests and small embedded deployments.
//!
//! # Invariants
//! - `max_connections` is at least 1.
//! - In-memory databases always run with a single pooled connection.

use super::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Backing store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseLocation {
    /// Private in-memory database, dropped with the `Database` handle.
    Memory,
    /// SQLite database file, created on first open.
    File { path: PathBuf },
}

/// Lock acquisition mode used when a scope begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeBehavior {
    /// Take the write lock lazily on first mutation. Readers never wait on
    /// writers; a stale read snapshot surfaces as a write conflict.
    Deferred,
    /// Take the write lock when the scope begins.
    Immediate,
    /// Take an exclusive lock when the scope begins.
    Exclusive,
}

impl ScopeBehavior {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED;",
            Self::Immediate => "BEGIN IMMEDIATE;",
            Self::Exclusive => "BEGIN EXCLUSIVE;",
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
            Self::Exclusive => "exclusive",
        }
    }
}

/// Configuration for one `Database` handle.
///
/// Every field has a default, so partial documents deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub location: DatabaseLocation,
    /// Upper bound of simultaneously open connections (file databases only).
    pub max_connections: u32,
    /// How long `Database::begin` waits for a free connection.
    pub acquire_timeout_ms: u64,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Per-statement execution limit. `None` disables the limit.
    pub statement_timeout_ms: Option<u64>,
    pub scope_behavior: ScopeBehavior,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            location: DatabaseLocation::Memory,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            statement_timeout_ms: None,
            scope_behavior: ScopeBehavior::Deferred,
        }
    }
}

impl DatabaseConfig {
    /// Config for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Config for a file database at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DatabaseLocation::File { path: path.into() },
            ..Self::default()
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_scope_behavior(mut self, behavior: ScopeBehavior) -> Self {
        self.scope_behavior = behavior;
        self
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    /// - `max_connections == 0`.
    /// - `acquire_timeout_ms == 0`.
    /// - `statement_timeout_ms == Some(0)`.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(DbError::InvalidConfig(
                "acquire_timeout_ms must be positive".to_string(),
            ));
        }
        if self.statement_timeout_ms == Some(0) {
            return Err(DbError::InvalidConfig(
                "statement_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective pool size; in-memory databases cannot be shared across
    /// connections.
    pub(crate) fn effective_pool_size(&self) -> u32 {
        match self.location {
            DatabaseLocation::Memory => 1,
            DatabaseLocation::File { .. } => self.max_connections,
        }
    }

    pub(crate) fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub(crate) fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub(crate) fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}

fn duration_to_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX).max(1)
}
