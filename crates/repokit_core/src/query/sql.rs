//! SQL rendering for query specifications and fixed CRUD verbs.
//!
//! # Responsibility
//! - Render predicate trees into WHERE clauses with a positional bind plan.
//! - Render ORDER BY with the identifier tie-break and LIMIT/OFFSET windows.
//! - Prepare the fixed CRUD statements of one descriptor once.
//!
//! # Invariants
//! - Rendered SQL never embeds argument values; every value is bound.
//! - Every ORDER BY ends with the identifier, so ordering is total.
//! - Equality renders as `IS`/`IS NOT`, so a NULL argument matches NULL.

use super::spec::{Comparator, Condition, Direction, Predicate, QuerySpecification, Sort};
use crate::error::{RepoError, RepoResult};
use crate::mapping::{EntityDescriptor, FieldType, Property};

/// Rewrite applied to an argument before it is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LikeWrap {
    /// `value%`
    Prefix,
    /// `%value`
    Suffix,
    /// `%value%`
    Infix,
}

/// Binds one call argument to one `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindSlot {
    /// Zero-based index into the call arguments.
    pub argument: usize,
    pub wrap: Option<LikeWrap>,
    /// Argument binds as an `rarray` table.
    pub list: bool,
}

/// Rendered WHERE body (without the keyword) and its bind plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompiledFilter {
    pub sql: String,
    pub slots: Vec<BindSlot>,
    /// Call arguments consumed; `slots` may bind some of them more than once.
    pub arity: usize,
}

/// Renders `predicate` against `descriptor`.
///
/// # Errors
/// - `InvalidArgument` for unknown properties or comparators that do not
///   apply to the property type.
pub(crate) fn compile_filter(
    descriptor: &EntityDescriptor,
    predicate: &Predicate,
) -> RepoResult<CompiledFilter> {
    let mut filter = CompiledFilter {
        sql: String::new(),
        slots: Vec::new(),
        arity: 0,
    };
    filter.sql = render_predicate(descriptor, predicate, false, &mut filter.slots, &mut filter.arity)?;
    Ok(filter)
}

fn render_predicate(
    descriptor: &EntityDescriptor,
    predicate: &Predicate,
    nested: bool,
    slots: &mut Vec<BindSlot>,
    next_argument: &mut usize,
) -> RepoResult<String> {
    let (parts, joiner) = match predicate {
        Predicate::Condition(condition) => {
            return render_condition(descriptor, condition, slots, next_argument);
        }
        Predicate::And(parts) => (parts, " AND "),
        Predicate::Or(parts) => (parts, " OR "),
    };
    if parts.is_empty() {
        return Err(RepoError::InvalidArgument(
            "empty AND/OR group in predicate".to_string(),
        ));
    }

    let rendered = parts
        .iter()
        .map(|part| render_predicate(descriptor, part, true, slots, next_argument))
        .collect::<RepoResult<Vec<_>>>()?;
    if rendered.len() == 1 {
        return Ok(rendered.into_iter().next().unwrap_or_default());
    }
    let joined = rendered.join(joiner);
    Ok(if nested { format!("({joined})") } else { joined })
}

fn render_condition(
    descriptor: &EntityDescriptor,
    condition: &Condition,
    slots: &mut Vec<BindSlot>,
    next_argument: &mut usize,
) -> RepoResult<String> {
    let property = resolve(descriptor, &condition.property)?;
    check_applicable(descriptor, property, condition.comparator)?;

    let fold = condition.ignore_case && property.field_type().is_textual();
    let column = if fold {
        format!("UPPER({})", property.quoted_column())
    } else {
        property.quoted_column()
    };
    let param = if fold { "UPPER(?)" } else { "?" };

    let mut bind = |wrap: Option<LikeWrap>, list: bool| {
        slots.push(BindSlot {
            argument: *next_argument,
            wrap,
            list,
        });
        *next_argument += 1;
    };

    let sql = match condition.comparator {
        Comparator::Equals => {
            bind(None, false);
            format!("{column} IS {param}")
        }
        Comparator::NotEquals => {
            bind(None, false);
            format!("{column} IS NOT {param}")
        }
        Comparator::LessThan => {
            bind(None, false);
            format!("{column} < {param}")
        }
        Comparator::LessThanEqual => {
            bind(None, false);
            format!("{column} <= {param}")
        }
        Comparator::GreaterThan => {
            bind(None, false);
            format!("{column} > {param}")
        }
        Comparator::GreaterThanEqual => {
            bind(None, false);
            format!("{column} >= {param}")
        }
        Comparator::Between => {
            bind(None, false);
            bind(None, false);
            format!("{column} BETWEEN {param} AND {param}")
        }
        Comparator::IsNull => format!("{column} IS NULL"),
        Comparator::IsNotNull => format!("{column} IS NOT NULL"),
        Comparator::Like => {
            bind(None, false);
            format!("{column} LIKE {param}")
        }
        Comparator::NotLike => {
            bind(None, false);
            format!("{column} NOT LIKE {param}")
        }
        Comparator::StartingWith => {
            bind(Some(LikeWrap::Prefix), false);
            format!("{column} LIKE {param} ESCAPE '\\'")
        }
        Comparator::EndingWith => {
            bind(Some(LikeWrap::Suffix), false);
            format!("{column} LIKE {param} ESCAPE '\\'")
        }
        Comparator::Containing => {
            bind(Some(LikeWrap::Infix), false);
            format!("{column} LIKE {param} ESCAPE '\\'")
        }
        Comparator::NotContaining => {
            bind(Some(LikeWrap::Infix), false);
            format!("{column} NOT LIKE {param} ESCAPE '\\'")
        }
        Comparator::In | Comparator::NotIn => {
            bind(None, true);
            let negation = if condition.comparator == Comparator::NotIn {
                "NOT "
            } else {
                ""
            };
            if fold {
                format!("{column} {negation}IN (SELECT UPPER(value) FROM rarray(?))")
            } else {
                format!("{column} {negation}IN rarray(?)")
            }
        }
        Comparator::True => format!("{column} = 1"),
        Comparator::False => format!("{column} = 0"),
    };
    Ok(sql)
}

fn resolve<'d>(descriptor: &'d EntityDescriptor, path: &str) -> RepoResult<&'d Property> {
    descriptor.property(path).ok_or_else(|| {
        RepoError::InvalidArgument(format!(
            "{} has no property `{path}`",
            descriptor.entity_name()
        ))
    })
}

fn check_applicable(
    descriptor: &EntityDescriptor,
    property: &Property,
    comparator: Comparator,
) -> RepoResult<()> {
    let field_type = property.field_type();
    let applicable = if comparator.requires_text() {
        field_type.is_textual()
    } else if comparator.requires_boolean() {
        field_type == FieldType::Boolean
    } else {
        true
    };
    if applicable {
        Ok(())
    } else {
        Err(RepoError::InvalidArgument(format!(
            "comparator {} does not apply to {}.{} ({field_type})",
            comparator.as_str(),
            descriptor.entity_name(),
            property.path()
        )))
    }
}

/// Renders `ORDER BY` for `sort` with the identifier as final tie-break.
///
/// # Errors
/// - `InvalidArgument` for unknown sort properties.
pub(crate) fn order_by_clause(descriptor: &EntityDescriptor, sort: &Sort) -> RepoResult<String> {
    let identifier = descriptor.identifier();
    let mut keys = Vec::with_capacity(sort.orders().len() + 1);
    let mut has_identifier = false;

    for order in sort.orders() {
        let property = descriptor.property(order.property()).ok_or_else(|| {
            RepoError::InvalidArgument(format!(
                "cannot sort {} by unknown property `{}`",
                descriptor.entity_name(),
                order.property()
            ))
        })?;
        if property.path() == identifier.path() {
            // A later key on the identifier could never change the order.
            if has_identifier {
                continue;
            }
            has_identifier = true;
        }
        let expression = if order.is_ignore_case() && property.field_type().is_textual() {
            format!("UPPER({})", property.quoted_column())
        } else {
            property.quoted_column()
        };
        keys.push(format!("{expression} {}", order.direction().sql()));
    }

    if !has_identifier {
        keys.push(format!(
            "{} {}",
            identifier.quoted_column(),
            Direction::Asc.sql()
        ));
    }
    Ok(format!("ORDER BY {}", keys.join(", ")))
}

fn where_clause(filter: Option<&CompiledFilter>) -> String {
    match filter {
        Some(filter) => format!(" WHERE {}", filter.sql),
        None => String::new(),
    }
}

/// `SELECT` of every mapped column. `windowed` appends `LIMIT ? OFFSET ?`,
/// bound after the filter arguments.
pub(crate) fn select_sql(
    descriptor: &EntityDescriptor,
    filter: Option<&CompiledFilter>,
    distinct: bool,
    order_by: &str,
    windowed: bool,
) -> String {
    let mut sql = format!(
        "SELECT {}{} FROM {}{} {order_by}",
        if distinct { "DISTINCT " } else { "" },
        descriptor.select_columns(),
        descriptor.quoted_table(),
        where_clause(filter)
    );
    if windowed {
        sql.push_str(" LIMIT ? OFFSET ?");
    }
    sql.push(';');
    sql
}

pub(crate) fn count_sql(descriptor: &EntityDescriptor, filter: Option<&CompiledFilter>) -> String {
    format!(
        "SELECT COUNT(*) FROM {}{};",
        descriptor.quoted_table(),
        where_clause(filter)
    )
}

pub(crate) fn exists_sql(descriptor: &EntityDescriptor, filter: Option<&CompiledFilter>) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM {}{});",
        descriptor.quoted_table(),
        where_clause(filter)
    )
}

/// Statements for the fixed CRUD verbs of one entity, rendered once.
#[derive(Debug, Clone)]
pub(crate) struct CrudStatements {
    /// Columns in storage order: identifier, version, attributes.
    pub insert: String,
    /// Binds attributes, then identifier, then (versioned) current version.
    pub update: String,
    pub select_by_id: String,
    pub select_by_ids: String,
    pub exists_by_id: String,
    pub delete_by_id: String,
    pub delete_by_ids: String,
    /// Binds identifier, then current version. Same as `delete_by_id` for
    /// unversioned entities.
    pub delete_versioned: String,
    pub count: String,
    pub delete_all: String,
}

impl CrudStatements {
    pub(crate) fn new(descriptor: &EntityDescriptor) -> RepoResult<Self> {
        let table = descriptor.quoted_table();
        let identifier = descriptor.identifier();
        let id_column = identifier.quoted_column();
        let order_by = order_by_clause(descriptor, &Sort::unsorted())?;

        let by_id = compile_filter(
            descriptor,
            &Predicate::Condition(Condition::new(identifier.path(), Comparator::Equals)),
        )?;
        let by_ids = compile_filter(
            descriptor,
            &Predicate::Condition(Condition::new(identifier.path(), Comparator::In)),
        )?;

        let columns = descriptor.select_columns();
        let placeholders = vec!["?"; descriptor.properties().len()].join(", ");
        let insert = format!("INSERT INTO {table} ({columns}) VALUES ({placeholders});");

        let mut assignments: Vec<String> = descriptor
            .attributes()
            .map(|property| format!("{} = ?", property.quoted_column()))
            .collect();
        let version_guard = match descriptor.version() {
            Some(version) => {
                let column = version.quoted_column();
                assignments.push(format!("{column} = {column} + 1"));
                format!(" AND {column} = ?")
            }
            None => String::new(),
        };
        if assignments.is_empty() {
            // Identifier-only entity: the update is a pure existence check.
            assignments.push(format!("{id_column} = {id_column}"));
        }
        let update = format!(
            "UPDATE {table} SET {} WHERE {id_column} = ?{version_guard};",
            assignments.join(", ")
        );

        let delete_by_id = format!("DELETE FROM {table} WHERE {id_column} = ?;");
        let delete_versioned = format!("DELETE FROM {table} WHERE {id_column} = ?{version_guard};");

        Ok(Self {
            insert,
            update,
            select_by_id: select_sql(descriptor, Some(&by_id), false, &order_by, false),
            select_by_ids: select_sql(descriptor, Some(&by_ids), false, &order_by, false),
            exists_by_id: exists_sql(descriptor, Some(&by_id)),
            delete_by_id,
            delete_by_ids: format!("DELETE FROM {table} WHERE {};", by_ids.sql),
            delete_versioned,
            count: count_sql(descriptor, None),
            delete_all: format!("DELETE FROM {table};"),
        })
    }
}

/// A specification rendered once, ready to bind and run.
#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    pub filter: Option<CompiledFilter>,
    pub sort: Sort,
    pub distinct: bool,
    pub limit: Option<u64>,
    /// `SELECT COUNT(*)` over the filter; used for find/count/page totals.
    pub count_sql: String,
    pub exists_sql: String,
}

impl CompiledQuery {
    pub(crate) fn compile(
        descriptor: &EntityDescriptor,
        spec: &QuerySpecification,
    ) -> RepoResult<Self> {
        let filter = spec
            .predicate
            .as_ref()
            .map(|predicate| compile_filter(descriptor, predicate))
            .transpose()?;
        // Validates static sort keys up front.
        order_by_clause(descriptor, &spec.sort)?;
        Ok(Self {
            count_sql: count_sql(descriptor, filter.as_ref()),
            exists_sql: exists_sql(descriptor, filter.as_ref()),
            filter,
            sort: spec.sort.clone(),
            distinct: spec.distinct,
            limit: spec.limit,
        })
    }

    pub(crate) fn arity(&self) -> usize {
        self.filter.as_ref().map_or(0, |filter| filter.arity)
    }

    /// `SELECT` with the static sort followed by `extra`, then the
    /// identifier tie-break.
    pub(crate) fn select_sql(
        &self,
        descriptor: &EntityDescriptor,
        extra: &Sort,
        windowed: bool,
    ) -> RepoResult<String> {
        let sort = self.sort.clone().then(extra);
        let order_by = order_by_clause(descriptor, &sort)?;
        Ok(select_sql(
            descriptor,
            self.filter.as_ref(),
            self.distinct,
            &order_by,
            windowed,
        ))
    }
}
