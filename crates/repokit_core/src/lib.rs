//! Generic repository engine over SQLite.
//!
//! Entities describe their persistence shape once; `Repository<E>` then
//! offers CRUD, paging, sorting and method-name-derived queries inside
//! explicit transactional scopes.

pub mod db;
pub(crate) mod engine;
pub mod error;
pub mod identity;
pub mod logging;
pub mod mapping;
pub mod query;
pub mod repo;

pub use db::{Database, DatabaseConfig, DatabaseLocation, DbError, Scope, ScopeBehavior, ScopeSource, ScopeState};
pub use error::{RepoError, RepoResult};
pub use identity::next_sequence_value;
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use mapping::{
    DescriptorBuilder, Entity, EntityDescriptor, EntityId, FieldType, FromValue,
    GenerationStrategy, MappingError, Record, RowWriter, ToValue,
};
pub use query::{
    Comparator, Direction, Order, PageRequest, Param, QueryDerivationError, QueryKind, Sort,
};
pub use repo::{Page, Repository, RepositoryBuilder};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
