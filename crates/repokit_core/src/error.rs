//! Repository error taxonomy.
//!
//! # Responsibility
//! - Give every failure of the engine one stable, matchable variant.
//! - Classify raw SQLite failures into timeout vs. opaque store errors.
//!
//! # Invariants
//! - Registration-time failures are `Mapping` or `QueryDerivation`.
//! - Everything else is a call-time failure returned to the caller as-is.

use crate::db::{DbError, ScopeState};
use crate::mapping::MappingError;
use crate::query::QueryDerivationError;
use rusqlite::{ffi, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error returned by repository, scope and registry operations.
#[derive(Debug)]
pub enum RepoError {
    /// Entity declaration does not describe a valid persisted shape.
    Mapping(MappingError),
    /// Derived operation name cannot be compiled against the descriptor.
    QueryDerivation(QueryDerivationError),
    /// Identifier missing or unusable where one is required.
    Identity(String),
    /// Versioned update/delete matched zero rows.
    OptimisticLock { entity: String, id: String },
    /// Caller passed malformed pagination, sort or query arguments.
    InvalidArgument(String),
    /// Statement or lock wait exceeded its time budget.
    Timeout(String),
    /// Opaque backing store failure (constraints, I/O, connectivity).
    Store(DbError),
    /// Existence-required variant found no row.
    NotFound { entity: String, id: String },
    /// Persisted row does not fit the entity descriptor.
    InvalidData(String),
    /// Scope was already committed or rolled back.
    InactiveScope(ScopeState),
}

impl RepoError {
    /// Returns whether this error came from a store constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Store(DbError::Sqlite(err)) => {
                err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
            }
            _ => false,
        }
    }

    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Mapping(_) => "mapping_error",
            Self::QueryDerivation(_) => "query_derivation_error",
            Self::Identity(_) => "identity_error",
            Self::OptimisticLock { .. } => "optimistic_lock_error",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "store_error",
            Self::NotFound { .. } => "not_found",
            Self::InvalidData(_) => "invalid_data",
            Self::InactiveScope(_) => "inactive_scope",
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mapping(err) => write!(f, "{err}"),
            Self::QueryDerivation(err) => write!(f, "{err}"),
            Self::Identity(message) => write!(f, "identity error: {message}"),
            Self::OptimisticLock { entity, id } => write!(
                f,
                "optimistic lock failure: {entity} with id {id} was modified or removed concurrently"
            ),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::Timeout(message) => write!(f, "timeout: {message}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::InactiveScope(state) => {
                write!(f, "transactional scope is no longer active ({state})")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Mapping(err) => Some(err),
            Self::QueryDerivation(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Identity(_)
            | Self::OptimisticLock { .. }
            | Self::InvalidArgument(_)
            | Self::Timeout(_)
            | Self::NotFound { .. }
            | Self::InvalidData(_)
            | Self::InactiveScope(_) => None,
        }
    }
}

impl From<MappingError> for RepoError {
    fn from(value: MappingError) -> Self {
        Self::Mapping(value)
    }
}

impl From<QueryDerivationError> for RepoError {
    fn from(value: QueryDerivationError) -> Self {
        Self::QueryDerivation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Store(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => {
                Self::Timeout("statement interrupted after exceeding its time limit".to_string())
            }
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::Timeout("database lock wait exceeded busy timeout".to_string())
            }
            _ => Self::Store(DbError::Sqlite(value)),
        }
    }
}

/// Whether a failed write lost against another writer on the same snapshot.
///
/// `BUSY_SNAPSHOT` means a concurrent scope committed after this scope's read
/// snapshot was taken. A plain `BUSY` counts too once the scope holds a
/// snapshot: SQLite refuses the upgrade to a write lock without waiting.
pub(crate) fn is_write_conflict(err: &rusqlite::Error, snapshot_held: bool) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.extended_code == ffi::SQLITE_BUSY_SNAPSHOT
                || (snapshot_held && failure.code == ErrorCode::DatabaseBusy)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{is_write_conflict, RepoError};
    use rusqlite::ffi;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn interrupted_statement_maps_to_timeout() {
        let err = RepoError::from(sqlite_failure(ffi::SQLITE_INTERRUPT));
        assert!(matches!(err, RepoError::Timeout(_)));
    }

    #[test]
    fn busy_database_maps_to_timeout() {
        let err = RepoError::from(sqlite_failure(ffi::SQLITE_BUSY));
        assert!(matches!(err, RepoError::Timeout(_)));
    }

    #[test]
    fn constraint_failure_stays_store_error() {
        let err = RepoError::from(sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert!(matches!(err, RepoError::Store(_)));
        assert!(err.is_constraint_violation());
        assert_eq!(err.code(), "store_error");
    }

    #[test]
    fn stale_snapshot_is_a_write_conflict() {
        let stale = sqlite_failure(ffi::SQLITE_BUSY_SNAPSHOT);
        assert!(is_write_conflict(&stale, false));
        assert!(is_write_conflict(&stale, true));
    }

    #[test]
    fn plain_busy_is_a_conflict_only_with_a_held_snapshot() {
        let busy = sqlite_failure(ffi::SQLITE_BUSY);
        assert!(is_write_conflict(&busy, true));
        assert!(!is_write_conflict(&busy, false));
        assert!(!is_write_conflict(&sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE), true));
        assert!(!is_write_conflict(&rusqlite::Error::QueryReturnedNoRows, true));
    }
}
