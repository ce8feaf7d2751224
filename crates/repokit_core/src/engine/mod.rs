//! Statement execution inside a scope.
//!
//! # Responsibility
//! - Run compiled statements with bound arguments on the scope's connection.
//! - Map rows to entities and entities to rows.
//! - Enforce optimistic locking on versioned writes.
//!
//! # Invariants
//! - Every statement runs through the scope, so failures roll the scope
//!   back and statement timeouts apply.
//! - A versioned write that loses a race against another scope is an
//!   optimistic lock failure.
//! - An entity is mutated (identifier, version) only after its statement
//!   succeeded.

pub(crate) mod bind;

use crate::db::Scope;
use crate::error::{RepoError, RepoResult};
use crate::identity::{self, WriteRoute};
use crate::mapping::{Entity, EntityDescriptor, Record, ToValue};
use crate::query::sql::CrudStatements;
use bind::Bound;
use log::{debug, warn};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::time::Instant;

/// Executes statements for one entity type within one scope.
pub(crate) struct Executor<'s, 'db> {
    scope: &'s Scope<'db>,
    descriptor: &'s EntityDescriptor,
}

impl<'s, 'db> Executor<'s, 'db> {
    pub(crate) fn new(scope: &'s Scope<'db>, descriptor: &'s EntityDescriptor) -> Self {
        Self { scope, descriptor }
    }

    /// Runs a `SELECT` of `select_columns` and maps every row.
    pub(crate) fn fetch<E: Entity>(&self, sql: &str, binds: &[Bound]) -> RepoResult<Vec<E>> {
        let started_at = Instant::now();
        let width = self.descriptor.properties().len();
        let rows: Vec<Vec<Value>> = self.scope.run(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let mapped = stmt.query_map(params_from_iter(binds.iter()), |row| {
                (0..width).map(|index| row.get::<_, Value>(index)).collect()
            })?;
            mapped.collect()
        })?;

        let entities = rows
            .into_iter()
            .map(|values| E::read(&Record::new(self.descriptor, values)))
            .collect::<RepoResult<Vec<E>>>()?;
        self.log("fetch", entities.len(), started_at);
        Ok(entities)
    }

    /// `fetch` for statements matching at most one row.
    pub(crate) fn fetch_optional<E: Entity>(
        &self,
        sql: &str,
        binds: &[Bound],
    ) -> RepoResult<Option<E>> {
        Ok(self.fetch(sql, binds)?.into_iter().next())
    }

    pub(crate) fn count(&self, sql: &str, binds: &[Bound]) -> RepoResult<u64> {
        let started_at = Instant::now();
        let count: i64 = self.scope.run(|conn| {
            conn.prepare_cached(sql)?
                .query_row(params_from_iter(binds.iter()), |row| row.get(0))
        })?;
        self.log("count", 1, started_at);
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }

    pub(crate) fn exists(&self, sql: &str, binds: &[Bound]) -> RepoResult<bool> {
        let started_at = Instant::now();
        let exists = self.scope.run(|conn| {
            conn.prepare_cached(sql)?
                .query_row(params_from_iter(binds.iter()), |row| row.get(0))
        })?;
        self.log("exists", 1, started_at);
        Ok(exists)
    }

    /// Runs one mutation and returns the affected row count.
    pub(crate) fn execute(&self, sql: &str, binds: &[Bound]) -> RepoResult<usize> {
        let started_at = Instant::now();
        let rows = self.scope.run(|conn| {
            conn.prepare_cached(sql)?
                .execute(params_from_iter(binds.iter()))
        })?;
        self.log("execute", rows, started_at);
        Ok(rows)
    }

    /// `execute` for a statement guarded by the row version of `id`.
    fn execute_versioned(&self, sql: &str, binds: &[Bound], id: &Value) -> RepoResult<usize> {
        let started_at = Instant::now();
        let rows = self.scope.run_versioned(
            |conn| {
                conn.prepare_cached(sql)?
                    .execute(params_from_iter(binds.iter()))
            },
            || self.optimistic_lock(id),
        )?;
        self.log("execute", rows, started_at);
        Ok(rows)
    }

    /// Inserts or updates `entity`.
    ///
    /// `attributes` is the output of `RowWriter::finish` for `entity`.
    pub(crate) fn save<E: Entity>(
        &self,
        statements: &CrudStatements,
        entity: &mut E,
        attributes: Vec<Value>,
    ) -> RepoResult<WriteRoute> {
        let route = identity::route(entity, self.descriptor, self.scope, &statements.exists_by_id)?;
        match route {
            WriteRoute::Insert => self.insert(statements, entity, attributes)?,
            WriteRoute::Update => self.update(statements, entity, attributes)?,
        }
        Ok(route)
    }

    fn insert<E: Entity>(
        &self,
        statements: &CrudStatements,
        entity: &mut E,
        attributes: Vec<Value>,
    ) -> RepoResult<()> {
        let id = identity::assign(entity, self.descriptor, self.scope)?;
        let versioned = self.descriptor.version().is_some();

        let mut binds = Vec::with_capacity(attributes.len() + 2);
        binds.push(Bound::Scalar(id.to_value()));
        if versioned {
            binds.push(Bound::Scalar(Value::Integer(0)));
        }
        binds.extend(attributes.into_iter().map(Bound::Scalar));
        self.execute(&statements.insert, &binds)?;

        entity.set_id(id);
        if versioned {
            entity.set_version(0);
        }
        Ok(())
    }

    fn update<E: Entity>(
        &self,
        statements: &CrudStatements,
        entity: &mut E,
        attributes: Vec<Value>,
    ) -> RepoResult<()> {
        let id = entity
            .id()
            .ok_or_else(|| RepoError::Identity("cannot update an entity without identifier".to_string()))?
            .to_value();
        let version = self.expected_version(entity)?;

        let mut binds: Vec<Bound> = attributes.into_iter().map(Bound::Scalar).collect();
        binds.push(Bound::Scalar(id.clone()));
        if let Some(version) = version {
            binds.push(Bound::Scalar(Value::Integer(version)));
        }

        let updated = match version {
            Some(_) => self.execute_versioned(&statements.update, &binds, &id)?,
            None => self.execute(&statements.update, &binds)?,
        };
        if updated == 0 {
            return Err(match version {
                Some(_) => self.optimistic_lock(&id),
                None => RepoError::NotFound {
                    entity: self.descriptor.entity_name().to_string(),
                    id: display_id(&id),
                },
            });
        }
        if let Some(version) = version {
            entity.set_version(version + 1);
        }
        Ok(())
    }

    /// Deletes `entity` by identifier, checking its version when versioned.
    ///
    /// A missing row is not an error; a row with a different version is.
    pub(crate) fn delete<E: Entity>(
        &self,
        statements: &CrudStatements,
        entity: &E,
    ) -> RepoResult<usize> {
        let Some(id) = entity.id() else {
            return Ok(0);
        };
        let id = id.to_value();
        let Some(version) = self.expected_version(entity)? else {
            return self.execute(&statements.delete_by_id, &[Bound::Scalar(id)]);
        };

        let deleted = self.execute_versioned(
            &statements.delete_versioned,
            &[Bound::Scalar(id.clone()), Bound::Scalar(Value::Integer(version))],
            &id,
        )?;
        if deleted == 0 && self.exists(&statements.exists_by_id, &[Bound::Scalar(id.clone())])? {
            return Err(self.optimistic_lock(&id));
        }
        Ok(deleted)
    }

    /// Version the stored row must carry; `None` for unversioned entities.
    fn expected_version<E: Entity>(&self, entity: &E) -> RepoResult<Option<i64>> {
        if self.descriptor.version().is_none() {
            return Ok(None);
        }
        entity.version().map(Some).ok_or_else(|| {
            RepoError::InvalidArgument(format!(
                "{} is versioned but the entity carries no version",
                self.descriptor.entity_name()
            ))
        })
    }

    fn optimistic_lock(&self, id: &Value) -> RepoError {
        warn!(
            "event=optimistic_lock module=engine status=conflict entity={} scope_id={}",
            self.descriptor.entity_name(),
            self.scope.id()
        );
        RepoError::OptimisticLock {
            entity: self.descriptor.entity_name().to_string(),
            id: display_id(id),
        }
    }

    fn log(&self, op: &str, rows: usize, started_at: Instant) {
        debug!(
            "event=statement module=engine status=ok op={} entity={} scope_id={} rows={} duration_ms={}",
            op,
            self.descriptor.entity_name(),
            self.scope.id(),
            rows,
            started_at.elapsed().as_millis()
        );
    }
}

/// Identifier rendered for error messages.
pub(crate) fn display_id(value: &Value) -> String {
    match value {
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Text(value) => value.clone(),
        Value::Null => "null".to_string(),
        Value::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}
