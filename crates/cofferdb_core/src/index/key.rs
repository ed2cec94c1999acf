//! Index names, composite keys and cache key layout.

use cofferdb_codec::{Document, Value, ID_FIELD};
use std::collections::HashMap;

/// Separator between field values in a composite key.
pub const KEY_DELIMITER: &str = "|";

/// Rendering of a missing or null field in a composite key.
pub const NULL_KEY: &str = "null";

/// Name of the index every collection carries.
pub const DEFAULT_INDEX: &str = ID_FIELD;

/// Derives an index name from its fields: `["name", "age"]` is `name_age`.
#[must_use]
pub fn index_name(fields: &[String]) -> String {
    fields.join("_")
}

/// Best-effort recovery of an index's fields from its name.
///
/// Last resort when an index file is unreadable, no definition is cached
/// and [`fields_from_name_in`] finds no split. Field names that themselves
/// contain `_` cannot be told apart.
#[must_use]
pub fn fields_from_name(name: &str) -> Vec<String> {
    if name == DEFAULT_INDEX {
        return vec![ID_FIELD.to_string()];
    }
    name.split('_')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Names with more `_`-separated gaps than this are not searched for a split.
const MAX_NAME_GAPS: usize = 10;

/// Recovers an index's fields from its name, using the stored documents to
/// choose between the ways an `_`-joined name can be split.
///
/// Picks the split with the fewest fields that all occur in at least one
/// document, so `created_at` stays one field when documents carry it.
/// Returns `None` if no split fits.
#[must_use]
pub fn fields_from_name_in(name: &str, documents: &[Document]) -> Option<Vec<String>> {
    if name == DEFAULT_INDEX {
        return Some(vec![ID_FIELD.to_string()]);
    }
    let segments: Vec<&str> = name.split('_').collect();
    let gaps = segments.len() - 1;
    if gaps > MAX_NAME_GAPS {
        return None;
    }

    let mut present: HashMap<String, bool> = HashMap::new();
    for splits in 0..=gaps {
        for mask in 0u32..(1 << gaps) {
            if mask.count_ones() as usize != splits {
                continue;
            }
            let mut fields = Vec::with_capacity(splits + 1);
            let mut start = 0;
            for end in 1..=segments.len() {
                if end == segments.len() || mask & (1 << (end - 1)) != 0 {
                    fields.push(segments[start..end].join("_"));
                    start = end;
                }
            }
            let fits = fields.iter().all(|field| {
                !field.is_empty()
                    && *present
                        .entry(field.clone())
                        .or_insert_with(|| documents.iter().any(|doc| doc.get_path(field).is_some()))
            });
            if fits {
                return Some(fields);
            }
        }
    }
    None
}

/// Composite key of a document for the given fields.
#[must_use]
pub fn composite_key(doc: &Document, fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| doc.get_path(field).map_or_else(|| NULL_KEY.to_string(), Value::to_key_string))
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER)
}

/// Composite key from explicit values, for lookups.
#[must_use]
pub fn composite_key_of(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_key_string)
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER)
}

/// Identifier rendering used in index entries and cache sets.
#[must_use]
pub fn id_key(doc: &Document) -> Option<String> {
    doc.id().map(Value::to_key_string)
}

/// Cache hash holding every index definition of a database.
#[must_use]
pub fn definitions_key(database: &str) -> String {
    format!("db:{database}:indexes")
}

/// Field of [`definitions_key`] for one index.
#[must_use]
pub fn definition_field(collection: &str, index: &str) -> String {
    format!("{collection}:{index}")
}

/// Prefix of every definition field belonging to a collection.
#[must_use]
pub fn definition_prefix(collection: &str) -> String {
    format!("{collection}:")
}

/// Cache set of identifiers for one composite key.
#[must_use]
pub fn set_key(database: &str, collection: &str, index: &str, key: &str) -> String {
    format!("index:{database}:{collection}:{index}:{key}")
}

/// Prefix of every set belonging to one index.
#[must_use]
pub fn index_set_prefix(database: &str, collection: &str, index: &str) -> String {
    format!("index:{database}:{collection}:{index}:")
}

/// Prefix of every set belonging to a collection.
#[must_use]
pub fn collection_set_prefix(database: &str, collection: &str) -> String {
    format!("index:{database}:{collection}:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn names() {
        assert_eq!(index_name(&fields(&["name", "age"])), "name_age");
        assert_eq!(index_name(&fields(&["_id"])), "_id");
        assert_eq!(fields_from_name("name_age"), fields(&["name", "age"]));
        assert_eq!(fields_from_name("_id"), fields(&["_id"]));
    }

    #[test]
    fn split_follows_stored_fields() {
        let docs = vec![
            Document::from_json(json!({"created_at": 1, "user_id": 7, "age": 3})).unwrap(),
            Document::from_json(json!({"name": "x"})).unwrap(),
        ];
        assert_eq!(fields_from_name_in("created_at", &docs), Some(fields(&["created_at"])));
        assert_eq!(
            fields_from_name_in("user_id_age", &docs),
            Some(fields(&["user_id", "age"]))
        );
        assert_eq!(fields_from_name_in("name_age", &docs), Some(fields(&["name", "age"])));
        assert_eq!(fields_from_name_in("_id", &[]), Some(fields(&["_id"])));
        assert_eq!(fields_from_name_in("missing_field", &docs), None);
    }

    #[test]
    fn composite_keys() {
        let doc = Document::from_json(json!({"name": "John", "age": 30, "a": {"b": true}})).unwrap();
        assert_eq!(composite_key(&doc, &fields(&["name", "age"])), "John|30");
        assert_eq!(composite_key(&doc, &fields(&["name", "zip"])), "John|null");
        assert_eq!(composite_key(&doc, &fields(&["a.b"])), "true");
        assert_eq!(
            composite_key_of(&[Value::from("John"), Value::from(30)]),
            "John|30"
        );
    }

    #[test]
    fn float_and_integer_keys_agree() {
        let a = Document::from_json(json!({"x": 30})).unwrap();
        let b = Document::from_json(json!({"x": 30.0})).unwrap();
        assert_eq!(composite_key(&a, &fields(&["x"])), composite_key(&b, &fields(&["x"])));
    }

    #[test]
    fn cache_keys() {
        assert_eq!(definitions_key("app"), "db:app:indexes");
        assert_eq!(definition_field("users", "age"), "users:age");
        assert_eq!(set_key("app", "users", "age", "30"), "index:app:users:age:30");
        assert!(set_key("app", "users", "age", "30").starts_with(&index_set_prefix("app", "users", "age")));
    }
}
