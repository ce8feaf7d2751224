//! Generic repository façade.
//!
//! # Responsibility
//! - Expose CRUD, paging, sorting and derived queries for one entity type.
//! - Validate arguments before any scope is touched.
//! - Route every call through a `ScopeSource`.
//!
//! # Invariants
//! - A built repository holds only immutable data and is `Send + Sync`.
//! - Derived operations are compiled at build time; call time only binds.
//! - Invalid arguments never roll back a caller's scope.

use super::page::Page;
use crate::db::ScopeSource;
use crate::engine::bind::{bind_arguments, window, Bound};
use crate::engine::{display_id, Executor};
use crate::error::{RepoError, RepoResult};
use crate::mapping::{register, Entity, EntityDescriptor, RowWriter, ToValue};
use crate::query::sql::{order_by_clause, select_sql, CrudStatements};
use crate::query::{derive_query, DerivedQuery, PageRequest, Param, QueryKind, Sort};
use log::{debug, info};
use rusqlite::types::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

/// Collects derived operation names before a repository is built.
pub struct RepositoryBuilder<E: Entity> {
    derived: Vec<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> RepositoryBuilder<E> {
    /// Declares one derived operation, e.g. `findByAuthorHandleOrderByLikesDesc`.
    pub fn derived(mut self, name: impl Into<String>) -> Self {
        self.derived.push(name.into());
        self
    }

    /// Registers the entity and compiles every declared operation.
    ///
    /// # Errors
    /// - `Mapping` when the entity declaration is invalid.
    /// - `QueryDerivation` when a derived name does not compile.
    pub fn build(self) -> RepoResult<Repository<E>> {
        let descriptor = register::<E>()?;
        let statements = CrudStatements::new(&descriptor)?;

        let mut derived = HashMap::with_capacity(self.derived.len());
        for name in self.derived {
            if derived.contains_key(&name) {
                continue;
            }
            let query = derive_query(&descriptor, &name)?;
            derived.insert(name, query);
        }

        info!(
            "event=repository_build module=repo status=ok entity={} derived={}",
            descriptor.entity_name(),
            derived.len()
        );
        Ok(Repository {
            descriptor,
            statements,
            derived,
            _entity: PhantomData,
        })
    }
}

/// CRUD-plus-query repository for entity type `E`.
///
/// Every operation takes a scope source first: a `Database` runs the call in
/// its own committed scope, a `Scope` joins the caller's transaction.
pub struct Repository<E: Entity> {
    descriptor: Arc<EntityDescriptor>,
    statements: CrudStatements,
    derived: HashMap<String, DerivedQuery>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub fn builder() -> RepositoryBuilder<E> {
        RepositoryBuilder {
            derived: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Repository without derived operations.
    pub fn new() -> RepoResult<Self> {
        Self::builder().build()
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Compiled derived operation by name.
    pub fn derived_query(&self, name: &str) -> Option<&DerivedQuery> {
        self.derived.get(name)
    }

    /// Creates the entity table when it does not exist yet.
    pub fn ensure_schema(&self, source: &impl ScopeSource) -> RepoResult<()> {
        let sql = self.descriptor.create_table_sql();
        source.within(|scope| scope.execute(&sql, []))?;
        info!(
            "event=schema_ensure module=repo status=ok entity={} table={}",
            self.descriptor.entity_name(),
            self.descriptor.table()
        );
        Ok(())
    }

    /// Inserts or updates `entity`, writing back generated identifier and
    /// new version on success.
    ///
    /// # Errors
    /// - `InvalidArgument` or `Mapping` when the entity does not fit the
    ///   descriptor (checked before the scope is touched).
    /// - `Identity` when an assigned identifier is missing.
    /// - `OptimisticLock` when the stored version moved on.
    pub fn save(&self, source: &impl ScopeSource, entity: &mut E) -> RepoResult<()> {
        let attributes = self.attributes(entity)?;
        source.within(|scope| {
            Executor::new(scope, &self.descriptor)
                .save(&self.statements, entity, attributes)
                .map(|_| ())
        })
    }

    /// Saves every entity or none of them.
    ///
    /// On failure the scope is rolled back and `entities` are restored to
    /// their state before the call.
    pub fn save_all(&self, source: &impl ScopeSource, entities: &mut [E]) -> RepoResult<()>
    where
        E: Clone,
    {
        let rows = entities
            .iter()
            .map(|entity| self.attributes(entity))
            .collect::<RepoResult<Vec<_>>>()?;
        let snapshot = entities.to_vec();

        let result = source.within(|scope| {
            let executor = Executor::new(scope, &self.descriptor);
            for (entity, attributes) in entities.iter_mut().zip(rows) {
                executor.save(&self.statements, entity, attributes)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => {
                debug!(
                    "event=save_all module=repo status=ok entity={} count={}",
                    self.descriptor.entity_name(),
                    entities.len()
                );
                Ok(())
            }
            Err(err) => {
                entities.clone_from_slice(&snapshot);
                Err(err)
            }
        }
    }

    pub fn find_by_id(&self, source: &impl ScopeSource, id: &E::Id) -> RepoResult<Option<E>> {
        let binds = [Bound::Scalar(id.to_value())];
        source.within(|scope| {
            Executor::new(scope, &self.descriptor).fetch_optional(&self.statements.select_by_id, &binds)
        })
    }

    /// `find_by_id` that fails with `NotFound` instead of returning `None`.
    pub fn get_by_id(&self, source: &impl ScopeSource, id: &E::Id) -> RepoResult<E> {
        self.find_by_id(source, id)?
            .ok_or_else(|| self.not_found(&id.to_value()))
    }

    pub fn exists_by_id(&self, source: &impl ScopeSource, id: &E::Id) -> RepoResult<bool> {
        let binds = [Bound::Scalar(id.to_value())];
        source.within(|scope| {
            Executor::new(scope, &self.descriptor).exists(&self.statements.exists_by_id, &binds)
        })
    }

    /// Every entity in identifier order.
    pub fn find_all(&self, source: &impl ScopeSource) -> RepoResult<Vec<E>> {
        self.find_all_sorted(source, &Sort::unsorted())
    }

    /// Every entity ordered by `sort`, ties broken by identifier.
    ///
    /// # Errors
    /// - `InvalidArgument` for unknown sort properties.
    pub fn find_all_sorted(&self, source: &impl ScopeSource, sort: &Sort) -> RepoResult<Vec<E>> {
        let order_by = order_by_clause(&self.descriptor, sort)?;
        let sql = select_sql(&self.descriptor, None, false, &order_by, false);
        source.within(|scope| Executor::new(scope, &self.descriptor).fetch(&sql, &[]))
    }

    /// Entities whose identifier is in `ids`, in identifier order. Unknown
    /// identifiers are skipped.
    pub fn find_all_by_id(&self, source: &impl ScopeSource, ids: &[E::Id]) -> RepoResult<Vec<E>> {
        let binds = [self.id_list(ids)];
        source.within(|scope| {
            Executor::new(scope, &self.descriptor).fetch(&self.statements.select_by_ids, &binds)
        })
    }

    /// One page of every entity ordered by the request's sort.
    ///
    /// A page past the end has empty content and the true total.
    pub fn find_page(&self, source: &impl ScopeSource, request: &PageRequest) -> RepoResult<Page<E>> {
        let order_by = order_by_clause(&self.descriptor, request.sort())?;
        let sql = select_sql(&self.descriptor, None, false, &order_by, true);
        let binds = window(request.page_size(), request.offset());
        source.within(|scope| {
            let executor = Executor::new(scope, &self.descriptor);
            let total = executor.count(&self.statements.count, &[])?;
            let content = executor.fetch(&sql, &binds)?;
            Ok(Page::new(content, request, total))
        })
    }

    pub fn count(&self, source: &impl ScopeSource) -> RepoResult<u64> {
        source.within(|scope| {
            Executor::new(scope, &self.descriptor).count(&self.statements.count, &[])
        })
    }

    /// Deletes by identifier; a missing row deletes nothing and returns 0.
    pub fn delete_by_id(&self, source: &impl ScopeSource, id: &E::Id) -> RepoResult<usize> {
        let binds = [Bound::Scalar(id.to_value())];
        source.within(|scope| {
            Executor::new(scope, &self.descriptor).execute(&self.statements.delete_by_id, &binds)
        })
    }

    /// `delete_by_id` that fails with `NotFound` when no row matched.
    pub fn delete_existing_by_id(&self, source: &impl ScopeSource, id: &E::Id) -> RepoResult<()> {
        let id = id.to_value();
        let binds = [Bound::Scalar(id.clone())];
        source.within(|scope| {
            let deleted =
                Executor::new(scope, &self.descriptor).execute(&self.statements.delete_by_id, &binds)?;
            if deleted == 0 {
                return Err(self.not_found(&id));
            }
            Ok(())
        })
    }

    /// Deletes `entity`, checking its version when the entity is versioned.
    ///
    /// # Errors
    /// - `OptimisticLock` when the stored row carries another version.
    pub fn delete(&self, source: &impl ScopeSource, entity: &E) -> RepoResult<usize> {
        source.within(|scope| Executor::new(scope, &self.descriptor).delete(&self.statements, entity))
    }

    /// Deletes every row whose identifier is in `ids`.
    pub fn delete_all_by_id(&self, source: &impl ScopeSource, ids: &[E::Id]) -> RepoResult<usize> {
        let binds = [self.id_list(ids)];
        source.within(|scope| {
            Executor::new(scope, &self.descriptor).execute(&self.statements.delete_by_ids, &binds)
        })
    }

    /// Deletes each entity with `delete` semantics, all or nothing.
    pub fn delete_all_entities(&self, source: &impl ScopeSource, entities: &[E]) -> RepoResult<usize> {
        source.within(|scope| {
            let executor = Executor::new(scope, &self.descriptor);
            let mut deleted = 0;
            for entity in entities {
                deleted += executor.delete(&self.statements, entity)?;
            }
            Ok(deleted)
        })
    }

    /// Deletes every row of the entity table.
    pub fn delete_all(&self, source: &impl ScopeSource) -> RepoResult<usize> {
        source.within(|scope| {
            Executor::new(scope, &self.descriptor).execute(&self.statements.delete_all, &[])
        })
    }

    /// Runs a derived find operation.
    pub fn find_by(&self, source: &impl ScopeSource, name: &str, args: &[Param]) -> RepoResult<Vec<E>> {
        self.find_by_sorted(source, name, args, &Sort::unsorted())
    }

    /// Runs a derived find operation with `sort` appended after the
    /// operation's own `OrderBy` keys.
    pub fn find_by_sorted(
        &self,
        source: &impl ScopeSource,
        name: &str,
        args: &[Param],
        sort: &Sort,
    ) -> RepoResult<Vec<E>> {
        let query = self.derived(name, QueryKind::Find)?;
        let compiled = query.compiled();
        let mut binds = bind_arguments(name, compiled.filter.as_ref(), args)?;
        let sql = compiled.select_sql(&self.descriptor, sort, compiled.limit.is_some())?;
        if let Some(limit) = compiled.limit {
            binds.extend(window(limit, 0));
        }
        source.within(|scope| Executor::new(scope, &self.descriptor).fetch(&sql, &binds))
    }

    /// Runs a derived find operation expected to match at most one entity.
    ///
    /// # Errors
    /// - `InvalidData` when more than one entity matches.
    pub fn find_one_by(&self, source: &impl ScopeSource, name: &str, args: &[Param]) -> RepoResult<Option<E>> {
        let query = self.derived(name, QueryKind::Find)?;
        let compiled = query.compiled();
        let mut binds = bind_arguments(name, compiled.filter.as_ref(), args)?;
        let sql = compiled.select_sql(&self.descriptor, &Sort::unsorted(), true)?;
        binds.extend(window(compiled.limit.unwrap_or(2).min(2), 0));

        let mut found: Vec<E> =
            source.within(|scope| Executor::new(scope, &self.descriptor).fetch(&sql, &binds))?;
        if found.len() > 1 {
            return Err(RepoError::InvalidData(format!(
                "`{name}` matched more than one {}",
                self.descriptor.entity_name()
            )));
        }
        Ok(found.pop())
    }

    /// Runs a derived find operation one page at a time.
    ///
    /// A `First<N>`/`Top<N>` cap bounds both the content and the total.
    pub fn find_page_by(
        &self,
        source: &impl ScopeSource,
        name: &str,
        args: &[Param],
        request: &PageRequest,
    ) -> RepoResult<Page<E>> {
        let query = self.derived(name, QueryKind::Find)?;
        let compiled = query.compiled();
        let filter_binds = bind_arguments(name, compiled.filter.as_ref(), args)?;
        let sql = compiled.select_sql(&self.descriptor, request.sort(), true)?;

        let cap = compiled.limit.unwrap_or(u64::MAX);
        let offset = request.offset();
        let limit = request.page_size().min(cap.saturating_sub(offset));
        let mut select_binds = filter_binds.clone();
        select_binds.extend(window(limit, offset));

        source.within(|scope| {
            let executor = Executor::new(scope, &self.descriptor);
            let total = executor.count(&compiled.count_sql, &filter_binds)?.min(cap);
            let content = if limit == 0 {
                Vec::new()
            } else {
                executor.fetch(&sql, &select_binds)?
            };
            Ok(Page::new(content, request, total))
        })
    }

    /// Runs a derived count operation.
    pub fn count_by(&self, source: &impl ScopeSource, name: &str, args: &[Param]) -> RepoResult<u64> {
        let query = self.derived(name, QueryKind::Count)?;
        let compiled = query.compiled();
        let binds = bind_arguments(name, compiled.filter.as_ref(), args)?;
        source.within(|scope| Executor::new(scope, &self.descriptor).count(&compiled.count_sql, &binds))
    }

    /// Runs a derived exists operation.
    pub fn exists_by(&self, source: &impl ScopeSource, name: &str, args: &[Param]) -> RepoResult<bool> {
        let query = self.derived(name, QueryKind::Exists)?;
        let compiled = query.compiled();
        let binds = bind_arguments(name, compiled.filter.as_ref(), args)?;
        source.within(|scope| Executor::new(scope, &self.descriptor).exists(&compiled.exists_sql, &binds))
    }

    /// Runs a derived delete operation and returns the number of deleted
    /// entities.
    ///
    /// Matching entities are loaded and deleted one by one, so versioned
    /// entities are version-checked.
    pub fn delete_by(&self, source: &impl ScopeSource, name: &str, args: &[Param]) -> RepoResult<usize> {
        let query = self.derived(name, QueryKind::Delete)?;
        let compiled = query.compiled();
        let binds = bind_arguments(name, compiled.filter.as_ref(), args)?;
        let sql = compiled.select_sql(&self.descriptor, &Sort::unsorted(), false)?;
        source.within(|scope| {
            let executor = Executor::new(scope, &self.descriptor);
            let matching: Vec<E> = executor.fetch(&sql, &binds)?;
            let mut deleted = 0;
            for entity in &matching {
                deleted += executor.delete(&self.statements, entity)?;
            }
            Ok(deleted)
        })
    }

    fn derived(&self, name: &str, expected: QueryKind) -> RepoResult<&DerivedQuery> {
        let query = self.derived.get(name).ok_or_else(|| {
            RepoError::InvalidArgument(format!(
                "`{name}` is not a derived operation of {}",
                self.descriptor.entity_name()
            ))
        })?;
        if query.kind() != expected {
            return Err(RepoError::InvalidArgument(format!(
                "`{name}` is a {} operation, not {}",
                query.kind().as_str(),
                expected.as_str()
            )));
        }
        Ok(query)
    }

    fn attributes(&self, entity: &E) -> RepoResult<Vec<Value>> {
        let mut row = RowWriter::new(&self.descriptor);
        entity.write(&mut row);
        row.finish()
    }

    fn id_list(&self, ids: &[E::Id]) -> Bound {
        Bound::List(Rc::new(ids.iter().map(ToValue::to_value).collect()))
    }

    fn not_found(&self, id: &Value) -> RepoError {
        RepoError::NotFound {
            entity: self.descriptor.entity_name().to_string(),
            id: display_id(id),
        }
    }
}
