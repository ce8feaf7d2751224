//! Entity descriptors: the static persistence shape of one entity type.
//!
//! # Responsibility
//! - Collect identifier, version and attribute declarations.
//! - Derive table and column names and validate them once.
//! - Answer property lookups for statement building and derived queries.
//!
//! # Invariants
//! - Exactly one identifier; at most one version.
//! - Property paths, columns and case-insensitive property keys are unique.
//! - A built descriptor is immutable.

use super::MappingError;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

static ENTITY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").expect("valid entity name regex"));
static PROPERTY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][A-Za-z0-9]*$").expect("valid property name regex"));
static TABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("valid table name regex"));

const RESERVED_TABLE_PREFIXES: &[&str] = &["sqlite_", "repokit_"];

/// Declared storage type of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    Real,
    Text,
    /// Stored as INTEGER 0/1.
    Boolean,
    Blob,
    /// Stored as hyphenated TEXT.
    Uuid,
}

impl FieldType {
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Uuid => "TEXT",
            Self::Blob => "BLOB",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Blob => "blob",
            Self::Uuid => "uuid",
        }
    }

    /// Whether text comparisons (LIKE, case folding) apply.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Uuid)
    }

    /// Whether a non-null `value` may be stored in a field of this type.
    pub(crate) fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Boolean, Value::Integer(flag)) => *flag == 0 || *flag == 1,
            (Self::Real, Value::Real(_) | Value::Integer(_)) => true,
            (Self::Text | Self::Uuid, Value::Text(_)) => true,
            (Self::Blob, Value::Blob(_)) => true,
            _ => false,
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How identifiers are produced on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStrategy {
    /// Caller supplies the identifier before saving.
    Assigned,
    /// Engine draws the next value from the store-side sequence table.
    Sequence,
    /// Engine generates a random v4 UUID client-side.
    Uuid,
}

impl GenerationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Sequence => "sequence",
            Self::Uuid => "uuid",
        }
    }

    fn supports(self, field_type: FieldType) -> bool {
        match self {
            Self::Assigned => true,
            Self::Sequence => field_type == FieldType::Integer,
            Self::Uuid => matches!(field_type, FieldType::Text | FieldType::Uuid),
        }
    }
}

impl Display for GenerationStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyRole {
    Identifier,
    Version,
    Attribute,
}

/// One persisted property: identifier, version or attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    path: String,
    column: String,
    field_type: FieldType,
    nullable: bool,
    unique: bool,
    role: PropertyRole,
}

impl Property {
    /// Dotted property path, e.g. `author.handle`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn unique(&self) -> bool {
        self.unique
    }

    pub fn role(&self) -> PropertyRole {
        self.role
    }

    /// Quoted column reference for SQL text.
    pub(crate) fn quoted_column(&self) -> String {
        quote_ident(&self.column)
    }
}

/// Immutable persistence metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    entity: String,
    table: String,
    generation: GenerationStrategy,
    properties: Vec<Property>,
    has_version: bool,
    by_path: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
}

impl EntityDescriptor {
    pub fn builder(entity: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(entity.into())
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn quoted_table(&self) -> String {
        quote_ident(&self.table)
    }

    pub fn generation(&self) -> GenerationStrategy {
        self.generation
    }

    /// All properties in storage order: identifier, version, attributes.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn identifier(&self) -> &Property {
        &self.properties[0]
    }

    pub fn version(&self) -> Option<&Property> {
        if self.has_version {
            self.properties.get(1)
        } else {
            None
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Property> {
        self.properties
            .iter()
            .filter(|property| property.role == PropertyRole::Attribute)
    }

    /// Looks up a property by dotted path; exact match first, then
    /// case-insensitive.
    pub fn property(&self, path: &str) -> Option<&Property> {
        self.position(path).map(|index| &self.properties[index])
    }

    pub(crate) fn position(&self, path: &str) -> Option<usize> {
        if let Some(index) = self.by_path.get(path) {
            return Some(*index);
        }
        self.properties
            .iter()
            .position(|property| property.path.eq_ignore_ascii_case(path))
    }

    /// Case-insensitive, boundary-free keys used by derived query parsing.
    ///
    /// Every property contributes its concatenated key (`authorhandle`);
    /// nested properties also contribute an explicit-boundary key
    /// (`author_handle`).
    pub(crate) fn property_keys(&self) -> Vec<(String, usize)> {
        let mut keys: Vec<(String, usize)> = self
            .by_key
            .iter()
            .map(|(key, index)| (key.clone(), *index))
            .collect();
        for (index, property) in self.properties.iter().enumerate() {
            if property.path.contains('.') {
                keys.push((property.path.to_ascii_lowercase().replace('.', "_"), index));
            }
        }
        keys
    }

    /// Comma-separated quoted column list in storage order.
    pub(crate) fn select_columns(&self) -> String {
        self.properties
            .iter()
            .map(Property::quoted_column)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Name of the row in `repokit_sequences` backing this entity.
    pub fn sequence_name(&self) -> String {
        format!("{}_seq", self.table)
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this entity.
    pub fn create_table_sql(&self) -> String {
        let mut columns = Vec::with_capacity(self.properties.len());
        for property in &self.properties {
            let mut column = format!(
                "{} {}",
                property.quoted_column(),
                property.field_type.sql_type()
            );
            if property.role == PropertyRole::Identifier {
                column.push_str(" PRIMARY KEY");
            }
            if !property.nullable {
                column.push_str(" NOT NULL");
            }
            if property.unique {
                column.push_str(" UNIQUE");
            }
            columns.push(column);
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            self.quoted_table(),
            columns.join(",\n    ")
        )
    }
}

#[derive(Debug, Clone)]
struct PendingProperty {
    segments: Vec<String>,
    field_type: FieldType,
    nullable: bool,
    role: PropertyRole,
}

/// Declarative builder for an `EntityDescriptor`.
///
/// Declaration mistakes are collected and reported by `build`.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    entity: String,
    table: Option<String>,
    generation: GenerationStrategy,
    pending: Vec<PendingProperty>,
    unique: Vec<String>,
}

impl DescriptorBuilder {
    fn new(entity: String) -> Self {
        Self {
            entity,
            table: None,
            generation: GenerationStrategy::Assigned,
            pending: Vec::new(),
            unique: Vec::new(),
        }
    }

    /// Overrides the default table name (snake_case entity name).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn id(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        generation: GenerationStrategy,
    ) -> Self {
        self.generation = generation;
        self.pending.push(PendingProperty {
            segments: vec![name.into()],
            field_type,
            nullable: false,
            role: PropertyRole::Identifier,
        });
        self
    }

    /// Declares the optimistic-locking version field (INTEGER).
    pub fn version(mut self, name: impl Into<String>) -> Self {
        self.pending.push(PendingProperty {
            segments: vec![name.into()],
            field_type: FieldType::Integer,
            nullable: false,
            role: PropertyRole::Version,
        });
        self
    }

    /// Declares a non-nullable attribute.
    pub fn attribute(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.pending
            .push(attribute(vec![name.into()], field_type, false));
        self
    }

    /// Declares a nullable attribute.
    pub fn nullable(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.pending
            .push(attribute(vec![name.into()], field_type, true));
        self
    }

    /// Declares a group of attributes stored inline under `prefix`.
    pub fn embedded(
        mut self,
        prefix: impl Into<String>,
        declare: impl FnOnce(EmbeddedBuilder) -> EmbeddedBuilder,
    ) -> Self {
        let group = declare(EmbeddedBuilder::new(vec![prefix.into()]));
        self.pending.extend(group.pending);
        self
    }

    /// Adds a UNIQUE constraint to an attribute path.
    pub fn unique(mut self, path: impl Into<String>) -> Self {
        self.unique.push(path.into());
        self
    }

    /// Validates the declaration and produces an immutable descriptor.
    ///
    /// # Errors
    /// - Invalid entity, table or property names.
    /// - Zero or several identifiers, several versions.
    /// - Duplicate paths, colliding columns or property keys.
    /// - Unique constraints on unknown attributes.
    /// - Generation strategy incompatible with the identifier type.
    pub fn build(self) -> Result<EntityDescriptor, MappingError> {
        let entity = self.entity;
        if !ENTITY_NAME_RE.is_match(&entity) {
            return Err(MappingError::InvalidName {
                entity: entity.clone(),
                name: entity,
            });
        }

        let table = self.table.unwrap_or_else(|| to_snake_case(&entity));
        if !TABLE_NAME_RE.is_match(&table)
            || RESERVED_TABLE_PREFIXES
                .iter()
                .any(|prefix| table.starts_with(prefix))
        {
            return Err(MappingError::InvalidName {
                entity,
                name: table,
            });
        }

        let identifiers: Vec<&PendingProperty> = self
            .pending
            .iter()
            .filter(|pending| pending.role == PropertyRole::Identifier)
            .collect();
        let identifier = match identifiers.as_slice() {
            [] => return Err(MappingError::MissingIdentifier { entity }),
            [single] => (*single).clone(),
            _ => return Err(MappingError::DuplicateIdentifier { entity }),
        };

        let versions: Vec<&PendingProperty> = self
            .pending
            .iter()
            .filter(|pending| pending.role == PropertyRole::Version)
            .collect();
        if versions.len() > 1 {
            return Err(MappingError::DuplicateVersion { entity });
        }
        let version = versions.first().map(|pending| (*pending).clone());

        if !self.generation.supports(identifier.field_type) {
            return Err(MappingError::IncompatibleGeneration {
                entity,
                strategy: self.generation,
                field_type: identifier.field_type,
            });
        }

        let ordered = std::iter::once(identifier)
            .chain(version)
            .chain(
                self.pending
                    .into_iter()
                    .filter(|pending| pending.role == PropertyRole::Attribute),
            );

        let mut properties = Vec::new();
        let mut by_path = HashMap::new();
        let mut by_key = HashMap::new();
        let mut columns: HashMap<String, String> = HashMap::new();

        for pending in ordered {
            if let Some(bad) = pending
                .segments
                .iter()
                .find(|segment| !PROPERTY_NAME_RE.is_match(segment))
            {
                return Err(MappingError::InvalidName {
                    entity,
                    name: bad.clone(),
                });
            }

            let path = pending.segments.join(".");
            let column = pending
                .segments
                .iter()
                .map(|segment| to_snake_case(segment))
                .collect::<Vec<_>>()
                .join("_");
            let key = pending.segments.concat().to_ascii_lowercase();

            if by_path.contains_key(&path) {
                return Err(MappingError::DuplicateProperty { entity, path });
            }
            if let Some(existing) = columns.get(&column) {
                return Err(MappingError::ConflictingColumn {
                    entity,
                    column,
                    first: existing.clone(),
                    second: path,
                });
            }
            if let Some(existing) = by_key.get(&key) {
                let first: &Property = &properties[*existing];
                return Err(MappingError::AmbiguousProperty {
                    entity,
                    first: first.path.clone(),
                    second: path,
                });
            }

            let index = properties.len();
            by_path.insert(path.clone(), index);
            by_key.insert(key, index);
            columns.insert(column.clone(), path.clone());
            properties.push(Property {
                path,
                column,
                field_type: pending.field_type,
                nullable: pending.nullable,
                unique: false,
                role: pending.role,
            });
        }

        for path in self.unique {
            match by_path.get(&path) {
                Some(index) if properties[*index].role == PropertyRole::Attribute => {
                    properties[*index].unique = true;
                }
                _ => return Err(MappingError::UnknownUniqueAttribute { entity, path }),
            }
        }

        Ok(EntityDescriptor {
            entity,
            table,
            generation: self.generation,
            has_version: properties
                .get(1)
                .is_some_and(|property| property.role == PropertyRole::Version),
            properties,
            by_path,
            by_key,
        })
    }
}

/// Attribute declarations nested under an embedded prefix.
#[derive(Debug, Clone)]
pub struct EmbeddedBuilder {
    prefix: Vec<String>,
    pending: Vec<PendingProperty>,
}

impl EmbeddedBuilder {
    fn new(prefix: Vec<String>) -> Self {
        Self {
            prefix,
            pending: Vec::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let segments = self.segments(name.into());
        self.pending.push(attribute(segments, field_type, false));
        self
    }

    pub fn nullable(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let segments = self.segments(name.into());
        self.pending.push(attribute(segments, field_type, true));
        self
    }

    pub fn embedded(
        mut self,
        prefix: impl Into<String>,
        declare: impl FnOnce(EmbeddedBuilder) -> EmbeddedBuilder,
    ) -> Self {
        let group = declare(EmbeddedBuilder::new(self.segments(prefix.into())));
        self.pending.extend(group.pending);
        self
    }

    fn segments(&self, name: String) -> Vec<String> {
        let mut segments = self.prefix.clone();
        segments.push(name);
        segments
    }
}

fn attribute(segments: Vec<String>, field_type: FieldType, nullable: bool) -> PendingProperty {
    PendingProperty {
        segments,
        field_type,
        nullable,
        role: PropertyRole::Attribute,
    }
}

/// `createdAt` -> `created_at`, `userID` -> `user_id`, `Tweet` -> `tweet`.
pub(crate) fn to_snake_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut previous_lower_or_digit = false;
    for ch in value.chars() {
        if ch.is_ascii_uppercase() {
            if previous_lower_or_digit {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            previous_lower_or_digit = false;
        } else {
            out.push(ch);
            previous_lower_or_digit = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

pub(crate) fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::{to_snake_case, EntityDescriptor, FieldType, GenerationStrategy, PropertyRole};
    use crate::mapping::MappingError;

    fn tweet() -> super::DescriptorBuilder {
        EntityDescriptor::builder("Tweet")
            .table("tweets")
            .id("id", FieldType::Integer, GenerationStrategy::Sequence)
            .version("version")
            .attribute("content", FieldType::Text)
            .embedded("author", |author| {
                author
                    .attribute("handle", FieldType::Text)
                    .nullable("displayName", FieldType::Text)
            })
    }

    #[test]
    fn builds_storage_order_and_columns() {
        let descriptor = tweet().build().expect("tweet descriptor should build");
        let paths: Vec<&str> = descriptor.properties().iter().map(|p| p.path()).collect();
        assert_eq!(
            paths,
            vec![
                "id",
                "version",
                "content",
                "author.handle",
                "author.displayName"
            ]
        );
        assert_eq!(
            descriptor
                .property("author.displayName")
                .map(|p| p.column()),
            Some("author_display_name")
        );
        assert_eq!(descriptor.identifier().role(), PropertyRole::Identifier);
        assert_eq!(descriptor.version().map(|p| p.path()), Some("version"));
        assert_eq!(descriptor.attributes().count(), 3);
        assert_eq!(descriptor.sequence_name(), "tweets_seq");
    }

    #[test]
    fn property_lookup_falls_back_to_case_insensitive() {
        let descriptor = tweet().build().unwrap();
        assert!(descriptor.property("AUTHOR.HANDLE").is_some());
        assert!(descriptor.property("author.missing").is_none());
    }

    #[test]
    fn rejects_missing_and_duplicate_identifiers() {
        let missing = EntityDescriptor::builder("Note")
            .attribute("body", FieldType::Text)
            .build()
            .unwrap_err();
        assert!(matches!(missing, MappingError::MissingIdentifier { .. }));

        let duplicate = EntityDescriptor::builder("Note")
            .id("id", FieldType::Integer, GenerationStrategy::Assigned)
            .id("otherId", FieldType::Integer, GenerationStrategy::Assigned)
            .build()
            .unwrap_err();
        assert!(matches!(duplicate, MappingError::DuplicateIdentifier { .. }));
    }

    #[test]
    fn rejects_column_collision_between_flat_and_embedded() {
        let err = EntityDescriptor::builder("Tweet")
            .id("id", FieldType::Integer, GenerationStrategy::Assigned)
            .attribute("authorHandle", FieldType::Text)
            .embedded("author", |author| author.attribute("handle", FieldType::Text))
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::ConflictingColumn { .. }));
    }

    #[test]
    fn rejects_incompatible_generation() {
        let err = EntityDescriptor::builder("Tweet")
            .id("id", FieldType::Text, GenerationStrategy::Sequence)
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::IncompatibleGeneration { .. }));
    }

    #[test]
    fn rejects_unique_on_identifier_or_unknown_path() {
        let err = tweet().unique("id").build().unwrap_err();
        assert!(matches!(err, MappingError::UnknownUniqueAttribute { .. }));
    }

    #[test]
    fn create_table_sql_carries_constraints() {
        let descriptor = tweet().unique("author.handle").build().unwrap();
        let sql = descriptor.create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tweets\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY NOT NULL"));
        assert!(sql.contains("\"author_handle\" TEXT NOT NULL UNIQUE"));
        assert!(sql.contains("\"author_display_name\" TEXT\n);"));
    }

    #[test]
    fn snake_case_handles_acronyms_and_digits() {
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("userID"), "user_id");
        assert_eq!(to_snake_case("line2Total"), "line2_total");
        assert_eq!(to_snake_case("Tweet"), "tweet");
    }
}
