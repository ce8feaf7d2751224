//! Explicit transactional scopes.
//!
//! # Responsibility
//! - Wrap one pooled connection in one SQLite transaction.
//! - Guard every statement with the configured statement timeout.
//! - Define who commits: the opener of a scope, never a joining operation.
//!
//! # Invariants
//! - A statement failure rolls the whole scope back before the error returns.
//! - Dropping an active scope rolls it back (cancellation).
//! - After commit or rollback every operation fails with `InactiveScope`.
//! - A write that loses against a concurrent writer after this scope read
//!   reports the caller's conflict error, never a lock timeout.

use super::config::ScopeBehavior;
use super::pool::PooledConnection;
use crate::error::{is_write_conflict, RepoError, RepoResult};
use log::{debug, info, warn};
use rusqlite::types::FromSql;
use rusqlite::{Connection, Params};
use std::cell::Cell;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// VM instructions between two deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a `Scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Active,
    Committed,
    RolledBack,
}

impl Display for ScopeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// A bounded unit of work with all-or-nothing commit semantics.
///
/// Obtained from `Database::begin`. Repository operations that receive a
/// `&Scope` join it and never commit it; the caller that opened the scope
/// decides between `commit` and `rollback`.
pub struct Scope<'db> {
    conn: PooledConnection,
    state: Cell<ScopeState>,
    /// Set once a statement succeeded, i.e. the transaction holds a snapshot.
    touched: Cell<bool>,
    statement_timeout: Option<Duration>,
    started_at: Instant,
    id: u64,
    _database: PhantomData<&'db ()>,
}

impl<'db> Scope<'db> {
    pub(crate) fn begin(
        conn: PooledConnection,
        behavior: ScopeBehavior,
        statement_timeout: Option<Duration>,
    ) -> RepoResult<Self> {
        conn.execute_batch(behavior.begin_sql())?;
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "event=scope_begin module=db status=ok scope_id={} behavior={}",
            id,
            behavior.as_str()
        );
        Ok(Self {
            conn,
            state: Cell::new(ScopeState::Active),
            touched: Cell::new(false),
            statement_timeout,
            started_at: Instant::now(),
            id,
            _database: PhantomData,
        })
    }

    /// Process-unique id, used to correlate log events.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ScopeState {
        self.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state.get() == ScopeState::Active
    }

    /// Commits every mutation issued within this scope.
    ///
    /// # Errors
    /// - `InactiveScope` when an earlier failure already rolled the scope back.
    /// - Store errors from `COMMIT`; the scope is rolled back in that case.
    pub fn commit(self) -> RepoResult<()> {
        self.ensure_active()?;
        if let Err(err) = self.conn.execute_batch("COMMIT;") {
            let err = RepoError::from(err);
            self.abort_in_place(err.code());
            return Err(err);
        }
        self.state.set(ScopeState::Committed);
        debug!(
            "event=scope_commit module=db status=ok scope_id={} duration_ms={}",
            self.id,
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Cancels the scope, undoing every mutation issued within it.
    pub fn rollback(self) -> RepoResult<()> {
        self.ensure_active()?;
        self.abort_in_place("caller_rollback");
        Ok(())
    }

    /// Executes one raw statement inside the scope.
    ///
    /// Intended for DDL and fixtures that the repository API does not cover.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> RepoResult<usize> {
        self.run(|conn| conn.execute(sql, params))
    }

    /// Runs one raw single-row, single-column query inside the scope.
    pub fn query_scalar<T: FromSql, P: Params>(&self, sql: &str, params: P) -> RepoResult<T> {
        self.run(|conn| conn.query_row(sql, params, |row| row.get(0)))
    }

    /// Runs one statement against the scope's connection.
    ///
    /// Installs the statement deadline when configured; any failure rolls the
    /// scope back before it is returned.
    pub(crate) fn run<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> RepoResult<T> {
        self.run_classified(op, |err, _| RepoError::from(err))
    }

    /// `run` for writes guarded by a version check: losing a write race
    /// against another scope returns `on_conflict()`.
    pub(crate) fn run_versioned<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
        on_conflict: impl FnOnce() -> RepoError,
    ) -> RepoResult<T> {
        self.run_classified(op, |err, snapshot_held| {
            if is_write_conflict(&err, snapshot_held) {
                on_conflict()
            } else {
                RepoError::from(err)
            }
        })
    }

    fn run_classified<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
        classify: impl FnOnce(rusqlite::Error, bool) -> RepoError,
    ) -> RepoResult<T> {
        self.ensure_active()?;

        if let Some(limit) = self.statement_timeout {
            let deadline = Instant::now() + limit;
            self.conn
                .progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));
        }
        let result = op(&self.conn);
        if self.statement_timeout.is_some() {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }

        match result {
            Ok(value) => {
                self.touched.set(true);
                Ok(value)
            }
            Err(err) => {
                let err = classify(err, self.touched.get());
                self.abort_in_place(err.code());
                Err(err)
            }
        }
    }

    /// Fails with `InactiveScope` unless the scope can still run statements.
    pub(crate) fn ensure_active(&self) -> RepoResult<()> {
        match self.state.get() {
            ScopeState::Active => Ok(()),
            other => Err(RepoError::InactiveScope(other)),
        }
    }

    /// Rolls the transaction back while leaving the value usable for state
    /// queries. Idempotent.
    pub(crate) fn abort_in_place(&self, reason: &str) {
        if self.state.get() != ScopeState::Active {
            return;
        }
        self.state.set(ScopeState::RolledBack);

        // SQLite already ended the transaction for some failures (interrupts,
        // I/O errors); ROLLBACK would then fail with "no transaction".
        if !self.conn.is_autocommit() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
                warn!(
                    "event=scope_rollback module=db status=error scope_id={} reason={} error={}",
                    self.id, reason, err
                );
                return;
            }
        }
        info!(
            "event=scope_rollback module=db status=ok scope_id={} reason={} duration_ms={}",
            self.id,
            reason,
            self.started_at.elapsed().as_millis()
        );
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if self.state.get() == ScopeState::Active {
            self.abort_in_place("dropped");
        }
    }
}

/// Where a repository operation gets its transactional scope from.
///
/// - `Database`: the operation opens its own scope and commits it on success.
/// - `Scope`: the operation joins the caller's scope and leaves commit to the
///   caller.
///
/// Either way a failure rolls the scope back before the error is returned.
pub trait ScopeSource {
    fn within<T, F>(&self, op: F) -> RepoResult<T>
    where
        F: FnOnce(&Scope<'_>) -> RepoResult<T>;
}

impl ScopeSource for Scope<'_> {
    fn within<T, F>(&self, op: F) -> RepoResult<T>
    where
        F: FnOnce(&Scope<'_>) -> RepoResult<T>,
    {
        self.ensure_active()?;
        op(self).map_err(|err| {
            self.abort_in_place(err.code());
            err
        })
    }
}
