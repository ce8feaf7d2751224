//! Query translation: specifications, derived names and SQL rendering.
//!
//! # Responsibility
//! - Model queries independently of SQL (`spec`).
//! - Compile operation names into specifications (`derive`).
//! - Render specifications and CRUD verbs into SQL with bind plans (`sql`).
//!
//! # Invariants
//! - Derivation errors surface when a repository is built, never per call.

pub mod derive;
pub mod spec;
pub(crate) mod sql;

pub use derive::{derive_query, parse_query_name, DerivationFailure, DerivedQuery, QueryDerivationError};
pub use spec::{
    Comparator, Condition, Direction, Order, PageRequest, Param, Predicate, QueryKind,
    QuerySpecification, Sort,
};
