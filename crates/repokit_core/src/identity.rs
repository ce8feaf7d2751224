//! Identifier generation and insert-vs-update routing.
//!
//! # Responsibility
//! - Produce identifiers for new entities per `GenerationStrategy`.
//! - Decide whether a save inserts or updates.
//!
//! # Invariants
//! - Sequence values come from `repokit_sequences` inside the caller's scope,
//!   so a rolled-back insert also rolls back its sequence step.
//! - A sequence never hands out a value at or below an identifier that was
//!   inserted explicitly for its entity type.
//! - `assign` never mutates the entity; the engine writes the identifier back
//!   once the INSERT succeeded, so a failed save leaves the entity untouched.

use crate::db::Scope;
use crate::error::{RepoError, RepoResult};
use crate::mapping::{Entity, EntityDescriptor, FromValue, GenerationStrategy, ToValue};
use log::debug;
use rusqlite::types::Value;
use uuid::Uuid;

const NEXT_SEQUENCE_SQL: &str = "INSERT INTO repokit_sequences (name, next_value) VALUES (?1, 1)
ON CONFLICT(name) DO UPDATE SET next_value = next_value + 1
RETURNING next_value;";

const RAISE_SEQUENCE_SQL: &str = "INSERT INTO repokit_sequences (name, next_value) VALUES (?1, ?2)
ON CONFLICT(name) DO UPDATE SET next_value = MAX(next_value, excluded.next_value);";

/// Write path chosen for one `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    Insert,
    Update,
}

/// Chooses between insert and update for `entity`.
///
/// - No identifier: insert.
/// - Versioned entity: insert while the version is unset, update otherwise.
/// - Unversioned with `Assigned` identifier: check the store for the row (merge).
/// - Unversioned with generated identifier: update.
pub(crate) fn route<E: Entity>(
    entity: &E,
    descriptor: &EntityDescriptor,
    scope: &Scope<'_>,
    exists_by_id_sql: &str,
) -> RepoResult<WriteRoute> {
    let Some(id) = entity.id() else {
        return Ok(WriteRoute::Insert);
    };
    if descriptor.version().is_some() {
        return Ok(match entity.version() {
            None => WriteRoute::Insert,
            Some(_) => WriteRoute::Update,
        });
    }
    if descriptor.generation() != GenerationStrategy::Assigned {
        return Ok(WriteRoute::Update);
    }

    let id = id.to_value();
    let exists: bool = scope.run(|conn| {
        conn.prepare_cached(exists_by_id_sql)?
            .query_row([id], |row| row.get(0))
    })?;
    Ok(if exists {
        WriteRoute::Update
    } else {
        WriteRoute::Insert
    })
}

/// Returns the identifier `entity` will be inserted with.
///
/// An identifier already present is kept for every strategy; for `Sequence`
/// the sequence is raised past it.
///
/// # Errors
/// - `Identity` when an `Assigned` entity has no identifier, or a generated
///   value does not fit the entity's identifier type.
pub(crate) fn assign<E: Entity>(
    entity: &E,
    descriptor: &EntityDescriptor,
    scope: &Scope<'_>,
) -> RepoResult<E::Id> {
    if let Some(id) = entity.id() {
        if descriptor.generation() == GenerationStrategy::Sequence {
            if let Value::Integer(explicit) = id.to_value() {
                raise_sequence(scope, &descriptor.sequence_name(), explicit)?;
            }
        }
        return Ok(id);
    }

    let generated = match descriptor.generation() {
        GenerationStrategy::Assigned => {
            return Err(RepoError::Identity(format!(
                "{} uses assigned identifiers but none was set before insert",
                descriptor.entity_name()
            )));
        }
        GenerationStrategy::Sequence => {
            Value::Integer(next_sequence_value(scope, &descriptor.sequence_name())?)
        }
        GenerationStrategy::Uuid => Value::Text(Uuid::new_v4().hyphenated().to_string()),
    };

    let id = E::Id::from_value(&generated).map_err(|message| {
        RepoError::Identity(format!(
            "generated identifier for {} does not fit: {message}",
            descriptor.entity_name()
        ))
    })?;
    debug!(
        "event=identity_assign module=identity status=ok entity={} strategy={} scope_id={}",
        descriptor.entity_name(),
        descriptor.generation(),
        scope.id()
    );
    Ok(id)
}

/// Advances the named sequence and returns the new value (first value: 1).
pub fn next_sequence_value(scope: &Scope<'_>, name: &str) -> RepoResult<i64> {
    scope.run(|conn| {
        conn.prepare_cached(NEXT_SEQUENCE_SQL)?
            .query_row([name], |row| row.get(0))
    })
}

/// Moves the named sequence to at least `floor`; never lowers it.
fn raise_sequence(scope: &Scope<'_>, name: &str, floor: i64) -> RepoResult<()> {
    scope.run(|conn| {
        conn.prepare_cached(RAISE_SEQUENCE_SQL)?
            .execute(rusqlite::params![name, floor])
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{assign, next_sequence_value, raise_sequence, route, WriteRoute};
    use crate::db::{Database, ScopeSource};
    use crate::error::{RepoError, RepoResult};
    use crate::mapping::{
        DescriptorBuilder, Entity, EntityDescriptor, FieldType, GenerationStrategy, Record,
        RowWriter,
    };

    #[derive(Debug, Clone, Default)]
    struct Label {
        code: Option<String>,
        text: String,
    }

    impl Entity for Label {
        type Id = String;

        fn describe() -> DescriptorBuilder {
            EntityDescriptor::builder("Label")
                .id("code", FieldType::Text, GenerationStrategy::Assigned)
                .attribute("text", FieldType::Text)
        }

        fn id(&self) -> Option<String> {
            self.code.clone()
        }

        fn set_id(&mut self, id: String) {
            self.code = Some(id);
        }

        fn write(&self, row: &mut RowWriter<'_>) {
            row.set("text", &self.text);
        }

        fn read(record: &Record<'_>) -> RepoResult<Self> {
            Ok(Self {
                code: Some(record.id()?),
                text: record.get("text")?,
            })
        }
    }

    #[test]
    fn sequences_are_independent_and_start_at_one() {
        let db = Database::open_in_memory().unwrap();
        let values = db
            .within(|scope| {
                Ok((
                    next_sequence_value(scope, "a_seq")?,
                    next_sequence_value(scope, "a_seq")?,
                    next_sequence_value(scope, "b_seq")?,
                ))
            })
            .unwrap();
        assert_eq!(values, (1, 2, 1));
    }

    #[test]
    fn rolled_back_scope_rolls_back_sequence() {
        let db = Database::open_in_memory().unwrap();
        {
            let scope = db.begin().unwrap();
            next_sequence_value(&scope, "a_seq").unwrap();
            scope.rollback().unwrap();
        }
        let value = db.within(|scope| next_sequence_value(scope, "a_seq")).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn raised_sequence_continues_past_the_floor_and_never_drops() {
        let db = Database::open_in_memory().unwrap();
        let values = db
            .within(|scope| {
                raise_sequence(scope, "a_seq", 5)?;
                let after_raise = next_sequence_value(scope, "a_seq")?;
                raise_sequence(scope, "a_seq", 2)?;
                Ok((after_raise, next_sequence_value(scope, "a_seq")?))
            })
            .unwrap();
        assert_eq!(values, (6, 7));
    }

    #[test]
    fn assigned_strategy_requires_identifier() {
        let db = Database::open_in_memory().unwrap();
        let descriptor = Label::describe().build().unwrap();
        let err = db
            .within(|scope| assign(&Label::default(), &descriptor, scope))
            .unwrap_err();
        assert!(matches!(err, RepoError::Identity(_)));
    }

    #[test]
    fn assigned_strategy_checks_for_existing_rows() {
        let db = Database::open_in_memory().unwrap();
        let descriptor = Label::describe().build().unwrap();
        let label = Label {
            code: Some("red".to_string()),
            text: "Red".to_string(),
        };
        let exists_sql = "SELECT EXISTS (SELECT 1 FROM \"label\" WHERE \"code\" = ?);";
        db.within(|scope| {
            scope.execute(&descriptor.create_table_sql(), [])?;
            assert_eq!(
                route(&label, &descriptor, scope, exists_sql)?,
                WriteRoute::Insert
            );
            scope.execute(
                "INSERT INTO \"label\" (\"code\", \"text\") VALUES ('red', 'Red');",
                [],
            )?;
            assert_eq!(
                route(&label, &descriptor, scope, exists_sql)?,
                WriteRoute::Update
            );
            Ok(())
        })
        .unwrap();
    }
}
