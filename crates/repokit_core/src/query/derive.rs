//! Method-name query derivation.
//!
//! # Responsibility
//! - Parse names like `findFirst3ByAuthorHandleAndLikesGreaterThanOrderByLikesDesc`
//!   into a `QuerySpecification`.
//! - Resolve property segments against one descriptor.
//!
//! # Invariants
//! - Every failure is a `QueryDerivationError`; parsing never panics.
//! - Property matching is case-insensitive and prefers the longest key,
//!   backtracking to shorter keys when the remainder does not parse.
//! - Call arguments bind in the order conditions appear in the name.

use super::spec::{
    Comparator, Condition, Direction, Order, Predicate, QueryKind, QuerySpecification, Sort,
};
use super::sql::CompiledQuery;
use crate::mapping::{EntityDescriptor, FieldType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<verb>find|read|get|query|search|stream|count|exists|delete|remove)(?P<subject>[A-Z0-9][A-Za-z0-9]*?)?By(?P<rest>[A-Z][A-Za-z0-9_]*)?$",
    )
    .expect("valid derived name regex")
});
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:First|Top)(?P<count>\d*)(?:[A-Z]|$)").expect("valid limit regex")
});

const ORDER_BY: &str = "OrderBy";
const ALL_IGNORE_CASE: &[&str] = &["AllIgnoreCase", "AllIgnoringCase"];
const IGNORE_CASE: &[&str] = &["IgnoreCase", "IgnoringCase"];

/// Comparator keywords accepted after a property segment.
///
/// Matching tries longer keywords first; a segment without keyword is
/// `Equals`.
pub(crate) const COMPARATOR_KEYWORDS: &[(&str, Comparator)] = &[
    ("Is", Comparator::Equals),
    ("Equals", Comparator::Equals),
    ("IsEquals", Comparator::Equals),
    ("Not", Comparator::NotEquals),
    ("IsNot", Comparator::NotEquals),
    ("LessThan", Comparator::LessThan),
    ("IsLessThan", Comparator::LessThan),
    ("Before", Comparator::LessThan),
    ("IsBefore", Comparator::LessThan),
    ("LessThanEqual", Comparator::LessThanEqual),
    ("IsLessThanEqual", Comparator::LessThanEqual),
    ("GreaterThan", Comparator::GreaterThan),
    ("IsGreaterThan", Comparator::GreaterThan),
    ("After", Comparator::GreaterThan),
    ("IsAfter", Comparator::GreaterThan),
    ("GreaterThanEqual", Comparator::GreaterThanEqual),
    ("IsGreaterThanEqual", Comparator::GreaterThanEqual),
    ("Between", Comparator::Between),
    ("IsBetween", Comparator::Between),
    ("Null", Comparator::IsNull),
    ("IsNull", Comparator::IsNull),
    ("NotNull", Comparator::IsNotNull),
    ("IsNotNull", Comparator::IsNotNull),
    ("Like", Comparator::Like),
    ("IsLike", Comparator::Like),
    ("NotLike", Comparator::NotLike),
    ("IsNotLike", Comparator::NotLike),
    ("StartingWith", Comparator::StartingWith),
    ("IsStartingWith", Comparator::StartingWith),
    ("StartsWith", Comparator::StartingWith),
    ("EndingWith", Comparator::EndingWith),
    ("IsEndingWith", Comparator::EndingWith),
    ("EndsWith", Comparator::EndingWith),
    ("Containing", Comparator::Containing),
    ("IsContaining", Comparator::Containing),
    ("Contains", Comparator::Containing),
    ("NotContaining", Comparator::NotContaining),
    ("IsNotContaining", Comparator::NotContaining),
    ("NotContains", Comparator::NotContaining),
    ("In", Comparator::In),
    ("IsIn", Comparator::In),
    ("NotIn", Comparator::NotIn),
    ("IsNotIn", Comparator::NotIn),
    ("True", Comparator::True),
    ("IsTrue", Comparator::True),
    ("False", Comparator::False),
    ("IsFalse", Comparator::False),
];

/// Why a derived name was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivationFailure {
    /// Name does not start with a known verb or lacks `By`.
    UnsupportedName,
    /// Nothing after `By`.
    MissingCriteria,
    /// A criteria segment names no property.
    UnresolvedProperty { segment: String },
    /// An `OrderBy` segment names no property.
    UnresolvedOrder { segment: String },
    EmptyOrderBy,
    ComparatorNotApplicable {
        property: String,
        comparator: Comparator,
        field_type: FieldType,
    },
    IgnoreCaseNotApplicable {
        property: String,
        field_type: FieldType,
    },
    InvalidLimit(String),
    /// Parsed specification could not be rendered to SQL.
    Unrenderable(String),
}

impl Display for DerivationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedName => write!(
                f,
                "expected <find|read|get|query|search|stream|count|exists|delete|remove>[Subject]By<Criteria>"
            ),
            Self::MissingCriteria => write!(f, "no criteria after `By`"),
            Self::UnresolvedProperty { segment } => {
                write!(f, "cannot resolve a property at `{segment}`")
            }
            Self::UnresolvedOrder { segment } => {
                write!(f, "cannot resolve a sort property at `{segment}`")
            }
            Self::EmptyOrderBy => write!(f, "`OrderBy` without sort properties"),
            Self::ComparatorNotApplicable {
                property,
                comparator,
                field_type,
            } => write!(
                f,
                "comparator {} does not apply to `{property}` ({field_type})",
                comparator.as_str()
            ),
            Self::IgnoreCaseNotApplicable {
                property,
                field_type,
            } => write!(f, "IgnoreCase does not apply to `{property}` ({field_type})"),
            Self::InvalidLimit(message) => write!(f, "invalid limit: {message}"),
            Self::Unrenderable(message) => write!(f, "{message}"),
        }
    }
}

/// Derived operation name that cannot be compiled for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDerivationError {
    pub operation: String,
    pub entity: String,
    pub reason: DerivationFailure,
}

impl Display for QueryDerivationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot derive query `{}` for {}: {}",
            self.operation, self.entity, self.reason
        )
    }
}

impl Error for QueryDerivationError {}

/// A derived operation compiled against one descriptor.
#[derive(Debug, Clone)]
pub struct DerivedQuery {
    name: String,
    spec: QuerySpecification,
    compiled: CompiledQuery,
}

impl DerivedQuery {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &QuerySpecification {
        &self.spec
    }

    pub fn kind(&self) -> QueryKind {
        self.spec.kind
    }

    /// Number of call arguments the operation expects.
    pub fn arity(&self) -> usize {
        self.compiled.arity()
    }

    pub(crate) fn compiled(&self) -> &CompiledQuery {
        &self.compiled
    }
}

/// Parses and compiles `name` against `descriptor`.
///
/// # Errors
/// - `QueryDerivationError` when the name does not parse or names unknown
///   properties.
pub fn derive_query(
    descriptor: &EntityDescriptor,
    name: &str,
) -> Result<DerivedQuery, QueryDerivationError> {
    let spec = parse_query_name(descriptor, name)?;
    let compiled = CompiledQuery::compile(descriptor, &spec).map_err(|err| QueryDerivationError {
        operation: name.to_string(),
        entity: descriptor.entity_name().to_string(),
        reason: DerivationFailure::Unrenderable(err.to_string()),
    })?;
    Ok(DerivedQuery {
        name: name.to_string(),
        spec,
        compiled,
    })
}

/// Parses `name` into a specification without rendering SQL.
pub fn parse_query_name(
    descriptor: &EntityDescriptor,
    name: &str,
) -> Result<QuerySpecification, QueryDerivationError> {
    let fail = |reason| QueryDerivationError {
        operation: name.to_string(),
        entity: descriptor.entity_name().to_string(),
        reason,
    };

    let captures = NAME_RE
        .captures(name)
        .ok_or_else(|| fail(DerivationFailure::UnsupportedName))?;
    let kind = match &captures["verb"] {
        "count" => QueryKind::Count,
        "exists" => QueryKind::Exists,
        "delete" | "remove" => QueryKind::Delete,
        _ => QueryKind::Find,
    };
    let subject = captures.name("subject").map_or("", |m| m.as_str());
    let rest = captures.name("rest").map_or("", |m| m.as_str());

    let distinct = subject.contains("Distinct");
    let limit = match LIMIT_RE.captures(subject) {
        Some(limit) => {
            if kind != QueryKind::Find {
                return Err(fail(DerivationFailure::InvalidLimit(format!(
                    "First/Top only applies to find queries, not {}",
                    kind.as_str()
                ))));
            }
            let digits = &limit["count"];
            let count = if digits.is_empty() {
                1
            } else {
                digits.parse::<u64>().map_err(|_| {
                    fail(DerivationFailure::InvalidLimit(format!("`{digits}` is out of range")))
                })?
            };
            if count == 0 {
                return Err(fail(DerivationFailure::InvalidLimit(
                    "limit must be positive".to_string(),
                )));
            }
            Some(count)
        }
        None => None,
    };

    let (criteria, orders) = match rest.find(ORDER_BY) {
        Some(at) => (&rest[..at], Some(&rest[at + ORDER_BY.len()..])),
        None => (rest, None),
    };
    let (criteria, all_ignore_case) = match ALL_IGNORE_CASE
        .iter()
        .find_map(|suffix| criteria.strip_suffix(suffix))
    {
        Some(stripped) => (stripped, true),
        None => (criteria, false),
    };

    let mut keys = descriptor.property_keys();
    keys.sort_by(|left, right| right.0.len().cmp(&left.0.len()).then(left.0.cmp(&right.0)));

    let predicate = if criteria.is_empty() {
        if orders.is_none() || kind == QueryKind::Delete {
            return Err(fail(DerivationFailure::MissingCriteria));
        }
        None
    } else {
        let mut matcher = Matcher::new(criteria, &keys);
        let drafts = matcher.parse_criteria(0).ok_or_else(|| {
            fail(DerivationFailure::UnresolvedProperty {
                segment: criteria[matcher.furthest..].to_string(),
            })
        })?;
        Some(build_predicate(descriptor, drafts, all_ignore_case).map_err(fail)?)
    };

    let sort = match orders {
        None => Sort::unsorted(),
        Some("") => return Err(fail(DerivationFailure::EmptyOrderBy)),
        Some(orders) => {
            let mut matcher = Matcher::new(orders, &keys);
            let parsed = matcher.parse_orders(0).ok_or_else(|| {
                fail(DerivationFailure::UnresolvedOrder {
                    segment: orders[matcher.furthest..].to_string(),
                })
            })?;
            Sort::by(
                parsed
                    .into_iter()
                    .map(|(index, direction)| {
                        Order::new(descriptor.properties()[index].path(), direction)
                    })
                    .collect(),
            )
        }
    };

    Ok(QuerySpecification {
        kind,
        predicate,
        sort,
        distinct,
        limit,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    And,
    Or,
}

#[derive(Debug, Clone, Copy)]
struct Draft {
    property: usize,
    comparator: Comparator,
    ignore_case: bool,
}

/// Backtracking matcher over one name fragment.
struct Matcher<'a> {
    text: &'a str,
    lower: String,
    /// Lowercase property keys, longest first.
    keys: &'a [(String, usize)],
    /// Furthest position where no alternative parsed; used for errors.
    furthest: usize,
}

impl<'a> Matcher<'a> {
    fn new(text: &'a str, keys: &'a [(String, usize)]) -> Self {
        Self {
            text,
            lower: text.to_ascii_lowercase(),
            keys,
            furthest: 0,
        }
    }

    /// A segment ends at the end of the text or before an uppercase letter.
    fn boundary(&self, at: usize) -> bool {
        at == self.text.len() || self.text.as_bytes()[at].is_ascii_uppercase()
    }

    fn word_at(&self, at: usize, word: &str) -> bool {
        self.text[at..].starts_with(word) && self.boundary(at + word.len())
    }

    fn dead_end(&mut self, at: usize) {
        self.furthest = self.furthest.max(at);
    }

    fn property_matches(&self, at: usize) -> Vec<(usize, usize)> {
        self.keys
            .iter()
            .filter(|(key, _)| {
                self.lower[at..].starts_with(key.as_str()) && self.boundary(at + key.len())
            })
            .map(|(key, index)| (at + key.len(), *index))
            .collect()
    }

    fn comparator_matches(&self, at: usize) -> Vec<(usize, Comparator)> {
        let mut found: Vec<(usize, Comparator)> = COMPARATOR_KEYWORDS
            .iter()
            .filter(|(keyword, _)| self.word_at(at, keyword))
            .map(|(keyword, comparator)| (at + keyword.len(), *comparator))
            .collect();
        found.sort_by(|left, right| right.0.cmp(&left.0));
        found.push((at, Comparator::Equals));
        found
    }

    fn parse_criteria(&mut self, at: usize) -> Option<Vec<(Link, Draft)>> {
        for (after_property, property) in self.property_matches(at) {
            for (after_comparator, comparator) in self.comparator_matches(after_property) {
                let (end, ignore_case) = match IGNORE_CASE
                    .iter()
                    .find(|word| self.word_at(after_comparator, word))
                {
                    Some(word) => (after_comparator + word.len(), true),
                    None => (after_comparator, false),
                };
                let draft = Draft {
                    property,
                    comparator,
                    ignore_case,
                };
                if end == self.text.len() {
                    return Some(vec![(Link::And, draft)]);
                }

                for (word, link) in [("And", Link::And), ("Or", Link::Or)] {
                    if !self.word_at(end, word) {
                        continue;
                    }
                    if let Some(mut tail) = self.parse_criteria(end + word.len()) {
                        tail[0].0 = link;
                        tail.insert(0, (Link::And, draft));
                        return Some(tail);
                    }
                }
                self.dead_end(end);
            }
        }
        self.dead_end(at);
        None
    }

    fn parse_orders(&mut self, at: usize) -> Option<Vec<(usize, Direction)>> {
        for (after_property, property) in self.property_matches(at) {
            let mut options = Vec::with_capacity(3);
            if self.word_at(after_property, "Asc") {
                options.push((after_property + 3, Direction::Asc));
            }
            if self.word_at(after_property, "Desc") {
                options.push((after_property + 4, Direction::Desc));
            }
            options.push((after_property, Direction::Asc));

            for (end, direction) in options {
                if end == self.text.len() {
                    return Some(vec![(property, direction)]);
                }
                if let Some(mut tail) = self.parse_orders(end) {
                    tail.insert(0, (property, direction));
                    return Some(tail);
                }
            }
        }
        self.dead_end(at);
        None
    }
}

fn build_predicate(
    descriptor: &EntityDescriptor,
    drafts: Vec<(Link, Draft)>,
    all_ignore_case: bool,
) -> Result<Predicate, DerivationFailure> {
    let mut groups: Vec<Vec<Predicate>> = vec![Vec::new()];
    for (link, draft) in drafts {
        let property = &descriptor.properties()[draft.property];
        let field_type = property.field_type();

        let applicable = if draft.comparator.requires_text() {
            field_type.is_textual()
        } else if draft.comparator.requires_boolean() {
            field_type == FieldType::Boolean
        } else {
            true
        };
        if !applicable {
            return Err(DerivationFailure::ComparatorNotApplicable {
                property: property.path().to_string(),
                comparator: draft.comparator,
                field_type,
            });
        }
        if draft.ignore_case && !field_type.is_textual() {
            return Err(DerivationFailure::IgnoreCaseNotApplicable {
                property: property.path().to_string(),
                field_type,
            });
        }

        let condition = Condition {
            property: property.path().to_string(),
            comparator: draft.comparator,
            ignore_case: draft.ignore_case || (all_ignore_case && field_type.is_textual()),
        };
        if link == Link::Or {
            groups.push(Vec::new());
        }
        if let Some(group) = groups.last_mut() {
            group.push(Predicate::Condition(condition));
        }
    }

    let mut alternatives: Vec<Predicate> = groups
        .into_iter()
        .map(|mut group| {
            if group.len() == 1 {
                group.remove(0)
            } else {
                Predicate::And(group)
            }
        })
        .collect();
    Ok(if alternatives.len() == 1 {
        alternatives.remove(0)
    } else {
        Predicate::Or(alternatives)
    })
}
