//! Positional argument binding for compiled statements.

use crate::error::{RepoError, RepoResult};
use crate::query::sql::{CompiledFilter, LikeWrap};
use crate::query::Param;
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::vtab::array::Array;
use rusqlite::ToSql;
use std::rc::Rc;

/// One value bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bound {
    Scalar(Value),
    /// Table-valued argument consumed by `rarray(?)`.
    List(Array),
}

impl ToSql for Bound {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Scalar(value) => value.to_sql(),
            Self::List(values) => values.to_sql(),
        }
    }
}

impl From<Value> for Bound {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

/// Window bounds for `LIMIT ? OFFSET ?`.
pub(crate) fn window(limit: u64, offset: u64) -> [Bound; 2] {
    [
        Bound::Scalar(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))),
        Bound::Scalar(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX))),
    ]
}

/// Resolves call arguments against the bind plan of `filter`.
///
/// # Errors
/// - `InvalidArgument` for a wrong argument count, a list where a scalar is
///   expected (or the reverse), or a non-text LIKE argument.
pub(crate) fn bind_arguments(
    operation: &str,
    filter: Option<&CompiledFilter>,
    args: &[Param],
) -> RepoResult<Vec<Bound>> {
    let Some(filter) = filter else {
        if args.is_empty() {
            return Ok(Vec::new());
        }
        return Err(arity_error(operation, 0, args.len()));
    };
    if args.len() != filter.arity {
        return Err(arity_error(operation, filter.arity, args.len()));
    }

    let mut bound = Vec::with_capacity(filter.slots.len());
    for slot in &filter.slots {
        let value = match (&args[slot.argument], slot.list) {
            (Param::List(values), true) => Bound::List(Rc::new(values.clone())),
            (Param::Value(value), false) => match slot.wrap {
                Some(wrap) => Bound::Scalar(like_pattern(operation, slot.argument, value, wrap)?),
                None => Bound::Scalar(value.clone()),
            },
            (Param::Value(_), true) => {
                return Err(RepoError::InvalidArgument(format!(
                    "`{operation}` argument {} must be a list",
                    slot.argument
                )));
            }
            (Param::List(_), false) => {
                return Err(RepoError::InvalidArgument(format!(
                    "`{operation}` argument {} must be a single value",
                    slot.argument
                )));
            }
        };
        bound.push(value);
    }
    Ok(bound)
}

fn arity_error(operation: &str, expected: usize, actual: usize) -> RepoError {
    RepoError::InvalidArgument(format!(
        "`{operation}` expects {expected} argument(s), got {actual}"
    ))
}

fn like_pattern(operation: &str, argument: usize, value: &Value, wrap: LikeWrap) -> RepoResult<Value> {
    let Value::Text(text) = value else {
        return Err(RepoError::InvalidArgument(format!(
            "`{operation}` argument {argument} must be text"
        )));
    };
    let escaped = escape_like(text);
    Ok(Value::Text(match wrap {
        LikeWrap::Prefix => format!("{escaped}%"),
        LikeWrap::Suffix => format!("%{escaped}"),
        LikeWrap::Infix => format!("%{escaped}%"),
    }))
}

/// Escapes LIKE wildcards for use with `ESCAPE '\'`.
pub(crate) fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
