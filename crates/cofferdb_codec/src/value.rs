//! Dynamic document value type.

use crate::document::Document;
use crate::object_id::ObjectId;
use std::cmp::Ordering;

/// A dynamic document value.
///
/// This is the closed set of types a document field may hold. Unlike a
/// canonical encoding, floats are supported; comparisons between an
/// `Integer` and a `Float` are numeric.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports full i64 range).
    Integer(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Binary blob.
    Bytes(Vec<u8>),
    /// Array of values.
    Array(Vec<Value>),
    /// Nested document.
    Document(Document),
    /// Object identifier.
    ObjectId(ObjectId),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// Human readable type name, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
            Value::ObjectId(_) => "objectId",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Returns true for `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for `Integer` and `Float`.
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    /// Returns the text content, if this is a `Text`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is an `Integer`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the numeric value of an `Integer` or `Float`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the elements, if this is an `Array`.
    #[must_use]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the nested document, if this is a `Document`.
    #[must_use]
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Returns the object id, if this is an `ObjectId`.
    #[must_use]
    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    /// Native ordering between two values.
    ///
    /// Numbers compare numerically across `Integer`/`Float`, text
    /// lexicographically, timestamps chronologically, object ids bytewise,
    /// booleans `false < true`. Values of different kinds, and compound
    /// values, are incomparable and return `None`.
    #[must_use]
    pub fn cmp_values(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::ObjectId(a), Value::ObjectId(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Total ordering used for sorting.
    ///
    /// Comparable values use [`cmp_values`](Self::cmp_values); everything
    /// else falls back to a fixed rank per type so sort is deterministic.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match self.cmp_values(other) {
            Some(ord) => ord,
            None => match self.type_rank().cmp(&other.type_rank()) {
                Ordering::Equal => self.to_key_string().cmp(&other.to_key_string()),
                ord => ord,
            },
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::Document(_) => 3,
            Value::Array(_) => 4,
            Value::Bytes(_) => 5,
            Value::ObjectId(_) => 6,
            Value::Bool(_) => 7,
            Value::Timestamp(_) => 8,
        }
    }

    /// Stable string rendering used in index keys and identifier sets.
    ///
    /// Scalars render bare (text verbatim, object ids as hex, timestamps as
    /// milliseconds); compound values render as compact JSON.
    #[must_use]
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::ObjectId(id) => id.to_hex(),
            Value::Timestamp(ms) => ms.to_string(),
            Value::Bytes(_) | Value::Array(_) | Value::Document(_) => self.to_json().to_string(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::ObjectId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_comparison_crosses_types() {
        assert_eq!(
            Value::Integer(3).cmp_values(&Value::Float(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Float(3.0).cmp_values(&Value::Integer(3)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn mixed_kinds_are_incomparable() {
        assert_eq!(Value::Integer(1).cmp_values(&Value::from("1")), None);
        assert_eq!(Value::Null.cmp_values(&Value::Integer(0)), None);
    }

    #[test]
    fn sort_cmp_ranks_types() {
        let mut values = vec![
            Value::from("b"),
            Value::Integer(2),
            Value::Null,
            Value::from("a"),
            Value::Float(1.5),
        ];
        values.sort_by(Value::sort_cmp);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Float(1.5),
                Value::Integer(2),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn key_string_rendering() {
        assert_eq!(Value::from("John").to_key_string(), "John");
        assert_eq!(Value::Integer(30).to_key_string(), "30");
        assert_eq!(Value::Null.to_key_string(), "null");
        assert_eq!(Value::Bool(true).to_key_string(), "true");
        let id = ObjectId::from_bytes([1; 12]);
        assert_eq!(Value::ObjectId(id).to_key_string(), id.to_hex());
        assert_eq!(
            Value::Array(vec![Value::Integer(1), Value::from("x")]).to_key_string(),
            "[1,\"x\"]"
        );
    }
}
