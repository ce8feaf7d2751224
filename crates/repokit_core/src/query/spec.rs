//! Query specification model: predicates, sorting, paging and call arguments.

use crate::error::{RepoError, RepoResult};
use crate::mapping::ToValue;
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    property: String,
    direction: Direction,
    ignore_case: bool,
}

impl Order {
    pub fn new(property: impl Into<String>, direction: Direction) -> Self {
        Self {
            property: property.into(),
            direction,
            ignore_case: false,
        }
    }

    pub fn asc(property: impl Into<String>) -> Self {
        Self::new(property, Direction::Asc)
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self::new(property, Direction::Desc)
    }

    /// Compares text case-insensitively.
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_ignore_case(&self) -> bool {
        self.ignore_case
    }
}

/// Ordered multi-key sort. Empty means "identifier ascending".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(orders: Vec<Order>) -> Self {
        Self { orders }
    }

    pub fn asc(property: impl Into<String>) -> Self {
        Self::by(vec![Order::asc(property)])
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self::by(vec![Order::desc(property)])
    }

    /// Appends one more key with lower precedence.
    pub fn and(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    /// Appends every key of `other` with lower precedence.
    pub fn then(mut self, other: &Sort) -> Self {
        self.orders.extend(other.orders.iter().cloned());
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Zero-based page coordinates plus sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    page_number: u64,
    page_size: u64,
    sort: Sort,
}

impl PageRequest {
    /// Validates raw pagination arguments.
    ///
    /// # Errors
    /// - `InvalidArgument` when `page_number < 0` or `page_size <= 0`.
    pub fn of(page_number: i64, page_size: i64) -> RepoResult<Self> {
        if page_number < 0 {
            return Err(RepoError::InvalidArgument(format!(
                "page number must not be negative, got {page_number}"
            )));
        }
        if page_size <= 0 {
            return Err(RepoError::InvalidArgument(format!(
                "page size must be positive, got {page_size}"
            )));
        }
        Ok(Self {
            page_number: page_number as u64,
            page_size: page_size as u64,
            sort: Sort::unsorted(),
        })
    }

    /// `of` with a sort.
    pub fn sorted(page_number: i64, page_size: i64, sort: Sort) -> RepoResult<Self> {
        Ok(Self::of(page_number, page_size)?.with_sort(sort))
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn page_number(&self) -> u64 {
        self.page_number
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Row offset of the first element, saturating on overflow.
    pub fn offset(&self) -> u64 {
        self.page_number.saturating_mul(self.page_size)
    }

    pub fn next(&self) -> Self {
        Self {
            page_number: self.page_number.saturating_add(1),
            page_size: self.page_size,
            sort: self.sort.clone(),
        }
    }
}

/// Row comparison operator.
///
/// New operators need one variant here, a keyword row in
/// `query::derive::COMPARATOR_KEYWORDS` and one arm in `query::sql`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    NotEquals,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Between,
    IsNull,
    IsNotNull,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    NotContaining,
    In,
    NotIn,
    True,
    False,
}

impl Comparator {
    /// Number of call arguments consumed.
    pub fn arity(self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull | Self::True | Self::False => 0,
            Self::Between => 2,
            _ => 1,
        }
    }

    /// Whether the argument is a list (`In`, `NotIn`).
    pub fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Whether the comparator only makes sense on text columns.
    pub fn requires_text(self) -> bool {
        matches!(
            self,
            Self::Like
                | Self::NotLike
                | Self::StartingWith
                | Self::EndingWith
                | Self::Containing
                | Self::NotContaining
        )
    }

    /// Whether the comparator only makes sense on boolean columns.
    pub fn requires_boolean(self) -> bool {
        matches!(self, Self::True | Self::False)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::LessThan => "less_than",
            Self::LessThanEqual => "less_than_equal",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanEqual => "greater_than_equal",
            Self::Between => "between",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Like => "like",
            Self::NotLike => "not_like",
            Self::StartingWith => "starting_with",
            Self::EndingWith => "ending_with",
            Self::Containing => "containing",
            Self::NotContaining => "not_containing",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::True => "true",
            Self::False => "false",
        }
    }
}

/// One `(property, comparator)` leaf of a predicate tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub property: String,
    pub comparator: Comparator,
    pub ignore_case: bool,
}

impl Condition {
    pub fn new(property: impl Into<String>, comparator: Comparator) -> Self {
        Self {
            property: property.into(),
            comparator,
            ignore_case: false,
        }
    }
}

/// Predicate tree. Arguments bind in left-to-right leaf order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Condition(Condition),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    /// Total call arguments the predicate consumes.
    pub fn arity(&self) -> usize {
        self.conditions()
            .iter()
            .map(|condition| condition.comparator.arity())
            .sum()
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Self::Condition(condition) => out.push(condition),
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Find,
    Count,
    Exists,
    Delete,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Count => "count",
            Self::Exists => "exists",
            Self::Delete => "delete",
        }
    }
}

/// Backend-independent description of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpecification {
    pub kind: QueryKind,
    pub predicate: Option<Predicate>,
    pub sort: Sort,
    pub distinct: bool,
    /// Row cap from `First<N>`/`Top<N>`.
    pub limit: Option<u64>,
}

impl QuerySpecification {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            predicate: None,
            sort: Sort::unsorted(),
            distinct: false,
            limit: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn arity(&self) -> usize {
        self.predicate.as_ref().map_or(0, Predicate::arity)
    }
}

/// One positional call argument of a derived query.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(Value),
    List(Vec<Value>),
}

impl Param {
    /// Argument for `In`/`NotIn` conditions.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToValue,
    {
        Self::List(items.into_iter().map(|item| item.to_value()).collect())
    }
}

impl<T: ToValue> From<T> for Param {
    fn from(value: T) -> Self {
        Self::Value(value.to_value())
    }
}

/// Builds a `Vec<Param>` from scalar expressions.
///
/// ```ignore
/// repo.find_by(&db, "findByAuthorHandleAndLikesGreaterThan", &repo_params!["ana", 10_i64])?;
/// ```
#[macro_export]
macro_rules! repo_params {
    () => {
        ::std::vec::Vec::<$crate::query::Param>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::query::Param::from($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::{Comparator, Condition, PageRequest, Param, Predicate, Sort};
    use crate::error::RepoError;
    use rusqlite::types::Value;

    #[test]
    fn page_request_validates_arguments() {
        assert!(matches!(
            PageRequest::of(-1, 10),
            Err(RepoError::InvalidArgument(_))
        ));
        assert!(matches!(
            PageRequest::of(0, 0),
            Err(RepoError::InvalidArgument(_))
        ));
        let page = PageRequest::of(2, 10).unwrap();
        assert_eq!(page.offset(), 20);
        assert_eq!(page.next().page_number(), 3);
    }

    #[test]
    fn predicate_arity_counts_every_leaf() {
        let predicate = Predicate::Or(vec![
            Predicate::And(vec![
                Predicate::Condition(Condition::new("likes", Comparator::Between)),
                Predicate::Condition(Condition::new("content", Comparator::IsNull)),
            ]),
            Predicate::Condition(Condition::new("id", Comparator::In)),
        ]);
        assert_eq!(predicate.arity(), 3);
        assert_eq!(predicate.conditions().len(), 3);
    }

    #[test]
    fn params_macro_and_list_build_values() {
        let params = crate::repo_params!["ana", 3_i64];
        assert_eq!(
            params,
            vec![
                Param::Value(Value::Text("ana".to_string())),
                Param::Value(Value::Integer(3)),
            ]
        );
        assert_eq!(
            Param::list([1_i64, 2]),
            Param::List(vec![Value::Integer(1), Value::Integer(2)])
        );
    }

    #[test]
    fn sort_then_appends_lower_precedence_keys() {
        let sort = Sort::desc("likes").then(&Sort::asc("content"));
        assert_eq!(sort.orders().len(), 2);
        assert_eq!(sort.orders()[1].property(), "content");
    }
}
