//! Ordered, schema-less document.

use crate::object_id::ObjectId;
use crate::value::Value;

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";

/// An insertion-ordered map of field name to [`Value`].
///
/// Field order is preserved through encoding and decoding. Paths passed to
/// the `*_path` methods are dot separated (`"address.city"`); a numeric
/// segment indexes into an array (`"tags.0"`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty document with room for `capacity` fields.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builds a document from fields whose names are already distinct,
    /// such as the keys of a map or a decoded document.
    ///
    /// Skips the per-field lookup [`Document::insert`] does, so building a
    /// large document stays linear. Repeated names are not detected.
    #[must_use]
    pub fn from_distinct_fields(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    /// Number of top-level fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns a mutable reference to a top-level field.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Returns true if a top-level field exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets a top-level field, replacing in place if it exists.
    ///
    /// Returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    /// Removes a top-level field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(pos).1)
    }

    /// Iterates over field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The identifier value, if present.
    #[must_use]
    pub fn id(&self) -> Option<&Value> {
        self.get(ID_FIELD)
    }

    /// The identifier as an [`ObjectId`], if present and of that type.
    #[must_use]
    pub fn object_id(&self) -> Option<ObjectId> {
        self.id().and_then(Value::as_object_id)
    }

    /// Makes sure the document carries an identifier, generating one if
    /// absent. The identifier is moved to the front of the field list.
    pub fn ensure_id(&mut self) -> Value {
        let id = self
            .remove(ID_FIELD)
            .unwrap_or_else(|| Value::ObjectId(ObjectId::new()));
        self.fields.insert(0, (ID_FIELD.to_string(), id.clone()));
        id
    }

    /// Resolves a dot-separated path.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolves a dot-separated path mutably, without creating anything.
    pub fn get_path_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get_mut(first)?;
        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get_mut(segment)?,
                Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Sets the value at a dot-separated path.
    ///
    /// Missing intermediate segments are created as empty documents, and a
    /// non-document intermediate value is replaced by one. Returns the
    /// previous value at the path.
    pub fn set_path(&mut self, path: &str, value: Value) -> Option<Value> {
        match path.split_once('.') {
            None => self.insert(path, value),
            Some((head, rest)) => {
                let is_doc = matches!(self.get(head), Some(Value::Document(_)));
                if !is_doc {
                    self.insert(head, Document::new());
                }
                match self.get_mut(head) {
                    Some(Value::Document(child)) => child.set_path(rest, value),
                    _ => None,
                }
            }
        }
    }

    /// Removes the value at a dot-separated path.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        match path.rsplit_once('.') {
            None => self.remove(path),
            Some((parent, leaf)) => match self.get_path_mut(parent)? {
                Value::Document(doc) => doc.remove(leaf),
                _ => None,
            },
        }
    }

    /// Converts into the underlying field list.
    #[must_use]
    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
