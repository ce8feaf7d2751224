//! Row-level bridges between entities and descriptor-ordered values.

use super::descriptor::{EntityDescriptor, PropertyRole};
use super::value::{storage_class, FromValue, ToValue};
use super::MappingError;
use crate::error::{RepoError, RepoResult};
use rusqlite::types::Value;

/// Collects attribute values from `Entity::write`.
///
/// Identifier and version are taken from `Entity::id`/`Entity::version`;
/// writing them here is a mapping error.
pub struct RowWriter<'d> {
    descriptor: &'d EntityDescriptor,
    values: Vec<Option<Value>>,
    error: Option<MappingError>,
}

impl<'d> RowWriter<'d> {
    pub(crate) fn new(descriptor: &'d EntityDescriptor) -> Self {
        Self {
            descriptor,
            values: vec![None; descriptor.properties().len()],
            error: None,
        }
    }

    /// Sets one attribute by property path.
    pub fn set(&mut self, path: &str, value: impl ToValue) -> &mut Self {
        if self.error.is_some() {
            return self;
        }

        let entity = self.descriptor.entity_name();
        let Some(index) = self.descriptor.position(path) else {
            self.error = Some(MappingError::UnknownProperty {
                entity: entity.to_string(),
                path: path.to_string(),
            });
            return self;
        };

        let property = &self.descriptor.properties()[index];
        if property.role() != PropertyRole::Attribute {
            self.error = Some(MappingError::NotAnAttribute {
                entity: entity.to_string(),
                path: property.path().to_string(),
            });
            return self;
        }

        let value = value.to_value();
        if !property.field_type().accepts(&value) {
            self.error = Some(MappingError::TypeMismatch {
                entity: entity.to_string(),
                path: property.path().to_string(),
                expected: property.field_type(),
                found: storage_class(&value),
            });
            return self;
        }

        self.values[index] = Some(value);
        self
    }

    /// Returns attribute values in storage order (identifier and version
    /// excluded).
    ///
    /// # Errors
    /// - Mapping errors recorded by `set`, or an attribute never set.
    /// - `InvalidArgument` when a non-nullable attribute is NULL.
    pub(crate) fn finish(self) -> RepoResult<Vec<Value>> {
        if let Some(err) = self.error {
            return Err(err.into());
        }

        let mut attributes = Vec::new();
        for (property, value) in self.descriptor.properties().iter().zip(self.values) {
            if property.role() != PropertyRole::Attribute {
                continue;
            }
            let value = value.ok_or_else(|| MappingError::MissingAttribute {
                entity: self.descriptor.entity_name().to_string(),
                path: property.path().to_string(),
            })?;
            if value == Value::Null && !property.nullable() {
                return Err(RepoError::InvalidArgument(format!(
                    "{}.{} is not nullable",
                    self.descriptor.entity_name(),
                    property.path()
                )));
            }
            attributes.push(value);
        }
        Ok(attributes)
    }
}

/// One stored row, addressed by property path.
pub struct Record<'d> {
    descriptor: &'d EntityDescriptor,
    values: Vec<Value>,
}

impl<'d> Record<'d> {
    /// `values` must be in descriptor storage order.
    pub(crate) fn new(descriptor: &'d EntityDescriptor, values: Vec<Value>) -> Self {
        Self { descriptor, values }
    }

    /// Reads one property and converts it.
    ///
    /// # Errors
    /// - `Mapping` for an unknown path.
    /// - `InvalidData` for NULL in a non-nullable column or a type mismatch.
    pub fn get<T: FromValue>(&self, path: &str) -> RepoResult<T> {
        let index =
            self.descriptor
                .position(path)
                .ok_or_else(|| MappingError::UnknownProperty {
                    entity: self.descriptor.entity_name().to_string(),
                    path: path.to_string(),
                })?;
        self.convert(index)
    }

    /// Reads the identifier.
    pub fn id<T: FromValue>(&self) -> RepoResult<T> {
        self.convert(0)
    }

    /// Reads the version; `None` for unversioned entities.
    pub fn version(&self) -> RepoResult<Option<i64>> {
        match self.descriptor.version() {
            Some(_) => self.convert(1).map(Some),
            None => Ok(None),
        }
    }

    /// Raw stored value by path.
    pub fn value(&self, path: &str) -> Option<&Value> {
        self.descriptor
            .position(path)
            .and_then(|index| self.values.get(index))
    }

    fn convert<T: FromValue>(&self, index: usize) -> RepoResult<T> {
        let property = &self.descriptor.properties()[index];
        let value = self.values.get(index).unwrap_or(&Value::Null);
        if *value == Value::Null && !property.nullable() {
            return Err(RepoError::InvalidData(format!(
                "NULL in non-nullable column {}.{}",
                self.descriptor.table(),
                property.column()
            )));
        }
        T::from_value(value).map_err(|message| {
            RepoError::InvalidData(format!(
                "{}.{}: {message}",
                self.descriptor.table(),
                property.column()
            ))
        })
    }
}
