//! Repository façade over the query translator and execution engine.
//!
//! # Responsibility
//! - Give application code one typed entry point per entity type.
//! - Keep SQL, binding and scope handling behind that entry point.
//!
//! # Invariants
//! - A repository never exists with an invalid descriptor or an
//!   uncompiled derived operation.

pub mod page;
pub mod repository;

pub use page::Page;
pub use repository::{Repository, RepositoryBuilder};
