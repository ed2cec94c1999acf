//! Query parsing and document matching.

use crate::error::{CoreError, CoreResult};
use cofferdb_codec::{Document, Value};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

/// A parsed query: top-level filters are implicitly AND-ed.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<Filter>,
}

/// One node of a query tree.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Conditions on a single field path, all of which must hold.
    Field {
        /// Dot-separated field path.
        path: String,
        /// Conditions applied to the field.
        conditions: Vec<Condition>,
    },
    /// True if every sub-filter matches.
    And(Vec<Filter>),
    /// True if any sub-filter matches.
    Or(Vec<Filter>),
    /// True if no sub-filter matches.
    Nor(Vec<Filter>),
    /// Unrecognized top-level operator; never matches.
    Unknown(String),
}

/// A comparison applied to a field value.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Equal (array fields match if any element is equal).
    Eq(Value),
    /// Not equal.
    Ne(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal.
    Lte(Value),
    /// Equal to any listed value.
    In(Vec<Value>),
    /// Equal to none of the listed values.
    Nin(Vec<Value>),
    /// Text field matches the pattern.
    Regex(Regex),
    /// Field presence.
    Exists(bool),
    /// Unrecognized operator; never matches.
    Unknown(String),
}

impl Query {
    /// The query that matches every document.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Parses a query document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for malformed operands (e.g. `$in` without
    /// an array, an invalid `$regex`). Unknown operators are not errors; they
    /// parse to variants that never match.
    pub fn parse(query: &Document) -> CoreResult<Self> {
        Ok(Self {
            filters: parse_filters(query)?,
        })
    }

    /// Returns true if the query has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Evaluates the query against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }
}

fn parse_filters(query: &Document) -> CoreResult<Vec<Filter>> {
    query
        .iter()
        .map(|(key, value)| parse_entry(key, value))
        .collect()
}

fn parse_entry(key: &str, value: &Value) -> CoreResult<Filter> {
    match key {
        "$and" => Ok(Filter::And(parse_branches(key, value)?)),
        "$or" => Ok(Filter::Or(parse_branches(key, value)?)),
        "$nor" => Ok(Filter::Nor(parse_branches(key, value)?)),
        op if op.starts_with('$') => Ok(Filter::Unknown(op.to_string())),
        path => Ok(Filter::Field {
            path: path.to_string(),
            conditions: parse_conditions(path, value)?,
        }),
    }
}

fn parse_branches(op: &str, value: &Value) -> CoreResult<Vec<Filter>> {
    let items = value
        .as_array()
        .ok_or_else(|| CoreError::invalid_operation(format!("{op} expects an array")))?;
    items
        .iter()
        .map(|item| match item {
            Value::Document(sub) => Ok(Filter::And(parse_filters(sub)?)),
            other => Err(CoreError::invalid_operation(format!(
                "{op} entries must be documents, found {}",
                other.type_name()
            ))),
        })
        .collect()
}

fn is_operator_document(doc: &Document) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn parse_conditions(path: &str, value: &Value) -> CoreResult<Vec<Condition>> {
    let ops = match value {
        Value::Document(doc) if is_operator_document(doc) => doc,
        literal => return Ok(vec![Condition::Eq(literal.clone())]),
    };

    let regex_options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
    let mut conditions = Vec::with_capacity(ops.len());
    for (op, operand) in ops.iter() {
        let condition = match op {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(array_operand(path, op, operand)?),
            "$nin" => Condition::Nin(array_operand(path, op, operand)?),
            "$regex" => Condition::Regex(build_regex(path, operand, regex_options)?),
            "$options" => continue,
            "$exists" => Condition::Exists(match operand {
                Value::Bool(b) => *b,
                Value::Integer(n) => *n != 0,
                other => {
                    return Err(CoreError::invalid_operation(format!(
                        "$exists on {path} expects a boolean, found {}",
                        other.type_name()
                    )))
                }
            }),
            unknown => Condition::Unknown(unknown.to_string()),
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn array_operand(path: &str, op: &str, operand: &Value) -> CoreResult<Vec<Value>> {
    operand.as_array().cloned().ok_or_else(|| {
        CoreError::invalid_operation(format!("{op} on {path} expects an array"))
    })
}

fn build_regex(path: &str, operand: &Value, options: &str) -> CoreResult<Regex> {
    let pattern = operand.as_str().ok_or_else(|| {
        CoreError::invalid_operation(format!("$regex on {path} expects a string"))
    })?;
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(CoreError::invalid_operation(format!(
                    "unsupported $options flag: {other}"
                )))
            }
        };
    }
    builder
        .build()
        .map_err(|e| CoreError::invalid_operation(format!("invalid $regex on {path}: {e}")))
}

impl Filter {
    /// Evaluates the filter against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Field { path, conditions } => {
                let value = doc.get_path(path);
                conditions.iter().all(|c| c.matches(value))
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Filter::Nor(filters) => !filters.iter().any(|f| f.matches(doc)),
            Filter::Unknown(_) => false,
        }
    }
}

/// Equality with numeric cross-type comparison.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return a.cmp_values(b) == Some(Ordering::Equal);
    }
    a == b
}

/// Applies `test` to the value, or to any element if the value is an array.
fn any_candidate(value: &Value, test: impl Fn(&Value) -> bool) -> bool {
    test(value)
        || match value {
            Value::Array(items) => items.iter().any(&test),
            _ => false,
        }
}

impl Condition {
    /// Evaluates the condition against a field value (`None` if absent).
    #[must_use]
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => eq_matches(value, expected),
            Condition::Ne(expected) => !eq_matches(value, expected),
            Condition::Gt(bound) => ordered(value, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => ordered(value, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => ordered(value, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => ordered(value, bound, |o| o != Ordering::Greater),
            Condition::In(set) => set.iter().any(|expected| eq_matches(value, expected)),
            Condition::Nin(set) => !set.iter().any(|expected| eq_matches(value, expected)),
            Condition::Regex(re) => value.is_some_and(|v| {
                any_candidate(v, |c| c.as_str().is_some_and(|s| re.is_match(s)))
            }),
            Condition::Exists(expected) => value.is_some() == *expected,
            Condition::Unknown(_) => false,
        }
    }
}

fn eq_matches(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        // An absent field equals null.
        None => expected.is_null(),
        Some(v) => any_candidate(v, |c| values_equal(c, expected)),
    }
}

fn ordered(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    value.is_some_and(|v| {
        any_candidate(v, |c| c.cmp_values(bound).is_some_and(|o| accept(o)))
    })
}
