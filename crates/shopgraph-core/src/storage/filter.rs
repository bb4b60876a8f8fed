//! Root filter evaluation and value ordering.

use std::cmp::Ordering;

use shopgraph_proto::{FilterExpr, SimpleFilter, Value};

use super::record::StoredEntity;

/// Evaluates root filters against stored entities.
///
/// A missing field or an incomparable value never matches, except for the
/// null checks, which treat a missing field as null.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Check whether an entity matches a filter.
    pub fn evaluate(filter: &FilterExpr, entity: &StoredEntity) -> bool {
        match filter {
            FilterExpr::Eq { field, value } => Self::test(entity, field, |v| values_equal(v, value)),
            FilterExpr::Ne { field, value } => {
                Self::test(entity, field, |v| !values_equal(v, value))
            }
            FilterExpr::Lt { field, value } => Self::test_order(entity, field, value, Ordering::is_lt),
            FilterExpr::Le { field, value } => Self::test_order(entity, field, value, Ordering::is_le),
            FilterExpr::Gt { field, value } => Self::test_order(entity, field, value, Ordering::is_gt),
            FilterExpr::Ge { field, value } => Self::test_order(entity, field, value, Ordering::is_ge),
            FilterExpr::In { field, values } => {
                Self::test(entity, field, |v| values.iter().any(|c| values_equal(v, c)))
            }
            FilterExpr::IsNull { field } => is_null(entity.get(field)),
            FilterExpr::IsNotNull { field } => !is_null(entity.get(field)),
            FilterExpr::Like { field, pattern } => Self::test(entity, field, |v| {
                v.as_str().is_some_and(|s| like_match(s, pattern))
            }),
            FilterExpr::And(filters) => filters.iter().all(|f| Self::evaluate_simple(f, entity)),
            FilterExpr::Or(filters) => filters.iter().any(|f| Self::evaluate_simple(f, entity)),
        }
    }

    fn evaluate_simple(filter: &SimpleFilter, entity: &StoredEntity) -> bool {
        match filter {
            SimpleFilter::Eq { field, value } => Self::test(entity, field, |v| values_equal(v, value)),
            SimpleFilter::Ne { field, value } => {
                Self::test(entity, field, |v| !values_equal(v, value))
            }
            SimpleFilter::Lt { field, value } => {
                Self::test_order(entity, field, value, Ordering::is_lt)
            }
            SimpleFilter::Gt { field, value } => {
                Self::test_order(entity, field, value, Ordering::is_gt)
            }
            SimpleFilter::In { field, values } => {
                Self::test(entity, field, |v| values.iter().any(|c| values_equal(v, c)))
            }
            SimpleFilter::IsNull { field } => is_null(entity.get(field)),
            SimpleFilter::Like { field, pattern } => Self::test(entity, field, |v| {
                v.as_str().is_some_and(|s| like_match(s, pattern))
            }),
        }
    }

    fn test(entity: &StoredEntity, field: &str, predicate: impl FnOnce(&Value) -> bool) -> bool {
        entity.get(field).is_some_and(predicate)
    }

    fn test_order(
        entity: &StoredEntity,
        field: &str,
        value: &Value,
        accept: fn(Ordering) -> bool,
    ) -> bool {
        Self::test(entity, field, |v| compare_values(v, value).is_some_and(accept))
    }
}

fn is_null(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Equality with integer widths folded together.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            a.as_i64() == b.as_i64()
        }
        _ => a == b,
    }
}

/// Ordering of comparable values; `None` for mismatched types.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
            Some(a.as_i64()?.cmp(&b.as_i64()?))
        }
        (Value::Float64(_), _) | (_, Value::Float64(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting rows: nulls first, then by value, with
/// incomparable values treated as equal so sorting stays stable.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (is_null(a), is_null(b)) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (a, b) {
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// Match a string against a SQL `LIKE` pattern.
///
/// `%` matches any run of characters, `_` exactly one; a backslash makes the
/// next pattern character literal.
pub fn like_match(value: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Lit(char),
    }

    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => match chars.next() {
                Some(escaped) => Token::Lit(escaped),
                None => Token::Lit('\\'),
            },
            c => Token::Lit(c),
        });
    }
    let text: Vec<char> = value.chars().collect();

    // Greedy match with backtracking to the most recent `%`.
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(Token::Any) => {
                star = Some((p, t));
                p += 1;
            }
            Some(Token::One) => {
                t += 1;
                p += 1;
            }
            Some(Token::Lit(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|t| *t == Token::Any)
}
