//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents and names that the
//! engine accepts.

use cofferdb_core::{Document, ObjectId, Value};
use proptest::prelude::*;

/// Strategy for generating valid database and collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating field names that are neither `_id` nor operators.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,7}").expect("Invalid regex")
}

/// Strategy for generating scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(Value::Integer),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
        any::<[u8; 12]>().prop_map(|b| Value::ObjectId(ObjectId::from_bytes(b))),
    ]
}

/// Strategy for generating nested values up to three levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec((field_name_strategy(), inner), 0..4).prop_map(|pairs| {
                let mut doc = Document::new();
                for (key, value) in pairs {
                    doc.insert(key, value);
                }
                Value::Document(doc)
            }),
        ]
    })
}

/// Strategy for generating documents without an `_id`.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::vec((field_name_strategy(), value_strategy()), 0..8).prop_map(|pairs| {
        let mut doc = Document::new();
        for (key, value) in pairs {
            doc.insert(key, value);
        }
        doc
    })
}

/// Strategy for generating flat person-like documents with an `age` field.
pub fn person_strategy() -> impl Strategy<Value = Document> {
    ("[A-Z][a-z]{2,8}", 0i64..100).prop_map(|(name, age)| {
        let mut doc = Document::new();
        doc.insert("name", name);
        doc.insert("age", age);
        doc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_names_are_valid(name in collection_name_strategy()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= 16);
        }

        #[test]
        fn generated_documents_have_no_id(doc in document_strategy()) {
            prop_assert!(doc.id().is_none());
        }

        #[test]
        fn people_have_integer_age(doc in person_strategy()) {
            prop_assert!(doc.get("age").and_then(Value::as_i64).is_some());
        }
    }
}
