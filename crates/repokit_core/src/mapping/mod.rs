//! Entity mapping: descriptors, the descriptor registry and value conversion.
//!
//! # Responsibility
//! - Define the `Entity` contract application types implement.
//! - Turn an entity declaration into an immutable `EntityDescriptor`.
//! - Move values between entities and descriptor-ordered rows.
//!
//! # Invariants
//! - Descriptor problems are reported as `MappingError` at registration.
//! - Row mapping never guesses: unknown paths and type mismatches are errors.

use crate::error::RepoResult;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod descriptor;
pub mod record;
pub mod registry;
pub mod value;

pub use descriptor::{
    DescriptorBuilder, EmbeddedBuilder, EntityDescriptor, FieldType, GenerationStrategy,
    Property, PropertyRole,
};
pub use record::{Record, RowWriter};
pub use registry::{register, registered, registered_count};
pub use value::{EntityId, FromValue, ToValue};

/// A persisted application type.
///
/// Implementations are plain data mappings; the engine drives them.
///
/// ```ignore
/// impl Entity for Tweet {
///     type Id = i64;
///
///     fn describe() -> DescriptorBuilder {
///         EntityDescriptor::builder("Tweet")
///             .id("id", FieldType::Integer, GenerationStrategy::Sequence)
///             .attribute("content", FieldType::Text)
///     }
///     // id/set_id/write/read ...
/// }
/// ```
pub trait Entity: Sized + Send + 'static {
    type Id: EntityId;

    /// Declares the persistence shape. Called once per process.
    fn describe() -> DescriptorBuilder;

    fn id(&self) -> Option<Self::Id>;

    fn set_id(&mut self, id: Self::Id);

    /// Current optimistic-locking version; `None` before the first insert.
    fn version(&self) -> Option<i64> {
        None
    }

    fn set_version(&mut self, _version: i64) {}

    /// Writes every attribute (not identifier/version) into `row`.
    fn write(&self, row: &mut RowWriter<'_>);

    /// Rebuilds an entity from one stored row.
    fn read(record: &Record<'_>) -> RepoResult<Self>;
}

/// Invalid entity declaration or entity-to-row mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    InvalidName {
        entity: String,
        name: String,
    },
    MissingIdentifier {
        entity: String,
    },
    DuplicateIdentifier {
        entity: String,
    },
    DuplicateVersion {
        entity: String,
    },
    DuplicateProperty {
        entity: String,
        path: String,
    },
    ConflictingColumn {
        entity: String,
        column: String,
        first: String,
        second: String,
    },
    AmbiguousProperty {
        entity: String,
        first: String,
        second: String,
    },
    UnknownUniqueAttribute {
        entity: String,
        path: String,
    },
    IdentifierTypeMismatch {
        entity: String,
        declared: FieldType,
        expected: FieldType,
    },
    IncompatibleGeneration {
        entity: String,
        strategy: GenerationStrategy,
        field_type: FieldType,
    },
    UnknownProperty {
        entity: String,
        path: String,
    },
    NotAnAttribute {
        entity: String,
        path: String,
    },
    MissingAttribute {
        entity: String,
        path: String,
    },
    TypeMismatch {
        entity: String,
        path: String,
        expected: FieldType,
        found: &'static str,
    },
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName { entity, name } => {
                write!(f, "mapping error in {entity}: invalid name `{name}`")
            }
            Self::MissingIdentifier { entity } => {
                write!(f, "mapping error in {entity}: no identifier declared")
            }
            Self::DuplicateIdentifier { entity } => {
                write!(f, "mapping error in {entity}: more than one identifier declared")
            }
            Self::DuplicateVersion { entity } => {
                write!(f, "mapping error in {entity}: more than one version field declared")
            }
            Self::DuplicateProperty { entity, path } => {
                write!(f, "mapping error in {entity}: property `{path}` declared twice")
            }
            Self::ConflictingColumn {
                entity,
                column,
                first,
                second,
            } => write!(
                f,
                "mapping error in {entity}: `{first}` and `{second}` both map to column `{column}`"
            ),
            Self::AmbiguousProperty {
                entity,
                first,
                second,
            } => write!(
                f,
                "mapping error in {entity}: `{first}` and `{second}` are indistinguishable in query names"
            ),
            Self::UnknownUniqueAttribute { entity, path } => write!(
                f,
                "mapping error in {entity}: unique constraint on unknown attribute `{path}`"
            ),
            Self::IdentifierTypeMismatch {
                entity,
                declared,
                expected,
            } => write!(
                f,
                "mapping error in {entity}: identifier declared as {declared} but the entity id type is {expected}"
            ),
            Self::IncompatibleGeneration {
                entity,
                strategy,
                field_type,
            } => write!(
                f,
                "mapping error in {entity}: {strategy} generation cannot produce {field_type} identifiers"
            ),
            Self::UnknownProperty { entity, path } => {
                write!(f, "mapping error in {entity}: unknown property `{path}`")
            }
            Self::NotAnAttribute { entity, path } => write!(
                f,
                "mapping error in {entity}: `{path}` is managed by the engine and cannot be written"
            ),
            Self::MissingAttribute { entity, path } => {
                write!(f, "mapping error in {entity}: attribute `{path}` was not written")
            }
            Self::TypeMismatch {
                entity,
                path,
                expected,
                found,
            } => write!(
                f,
                "mapping error in {entity}: `{path}` expects {expected}, got {found}"
            ),
        }
    }
}

impl Error for MappingError {}
