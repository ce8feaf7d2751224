//! Process-wide entity descriptor registry.
//!
//! # Responsibility
//! - Build each entity type's descriptor once, on first use.
//! - Share the built descriptor with every repository of that type.
//!
//! # Invariants
//! - Registration is idempotent per `TypeId`.
//! - An entry is never replaced or removed once inserted.
//! - This is the only global state of the engine.

use super::{Entity, EntityDescriptor, EntityId, MappingError};
use log::info;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

static REGISTRY: Lazy<RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Returns the descriptor of `E`, building and registering it on first use.
///
/// Concurrent first calls may both build a descriptor; the first insert wins
/// and every caller receives that same `Arc`.
///
/// # Errors
/// - `MappingError` when `E::describe()` is invalid or its identifier type
///   disagrees with `E::Id`.
pub fn register<E: Entity>() -> Result<Arc<EntityDescriptor>, MappingError> {
    if let Some(existing) = registered::<E>() {
        return Ok(existing);
    }

    let descriptor = E::describe().build()?;
    let declared = descriptor.identifier().field_type();
    if declared != E::Id::FIELD_TYPE {
        return Err(MappingError::IdentifierTypeMismatch {
            entity: descriptor.entity_name().to_string(),
            declared,
            expected: E::Id::FIELD_TYPE,
        });
    }

    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    let entry = registry
        .entry(TypeId::of::<E>())
        .or_insert_with(|| {
            info!(
                "event=entity_register module=mapping status=ok entity={} table={} properties={} generation={} versioned={}",
                descriptor.entity_name(),
                descriptor.table(),
                descriptor.properties().len(),
                descriptor.generation(),
                descriptor.version().is_some()
            );
            Arc::new(descriptor)
        });
    Ok(Arc::clone(entry))
}

/// Returns the descriptor of `E` if it has been registered.
pub fn registered<E: Entity>() -> Option<Arc<EntityDescriptor>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&TypeId::of::<E>())
        .cloned()
}

/// Number of registered entity types.
pub fn registered_count() -> usize {
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).len()
}
