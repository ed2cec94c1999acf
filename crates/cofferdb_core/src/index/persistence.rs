//! Index definitions and index files.
//!
//! ## Format
//!
//! Each index is one encrypted file `_index_<name>.bson` holding:
//! ```text
//! {
//!     metadata: { name, collection, fields, options: { unique, sparse }, createdAt },
//!     data:     { <compositeKey>: [<id>, ...], ... }
//! }
//! ```
//!
//! Index files are derived state: a file that fails to load is rebuilt
//! from the collection's data file, never reported to the caller.

use super::key::{composite_key, id_key, index_name};
use crate::config::IndexOptions;
use crate::crypto::EncryptionCodec;
use crate::error::{CoreError, CoreResult};
use crate::sealed::{read_document, write_document};
use cofferdb_codec::{CodecError, Document, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

const METADATA_FIELD: &str = "metadata";
const DATA_FIELD: &str = "data";

/// Definition of one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    /// Index name, derived from the fields.
    pub name: String,
    /// Owning collection.
    pub collection: String,
    /// Indexed field paths, in key order.
    pub fields: Vec<String>,
    /// Declared options.
    #[serde(default)]
    pub options: IndexOptions,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl IndexMetadata {
    /// Creates a definition stamped with the current time.
    #[must_use]
    pub fn new(collection: &str, fields: Vec<String>, options: IndexOptions) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        Self {
            name: index_name(&fields),
            collection: collection.to_string(),
            fields,
            options,
            created_at,
        }
    }

    /// Renders the definition as JSON text, the cache representation.
    pub fn to_json_string(&self) -> CoreResult<String> {
        serde_json::to_string(self)
            .map_err(|e| CodecError::encoding_failed(e.to_string()).into())
    }

    /// Parses the cache representation.
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| CodecError::decoding_failed(e.to_string()).into())
    }

    fn to_document(&self) -> CoreResult<Document> {
        let json = serde_json::to_value(self)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(Document::from_json(json)?)
    }

    fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(doc.to_json())
    }
}

/// An index definition together with its key-to-identifiers map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    /// The definition.
    pub metadata: IndexMetadata,
    /// Composite key to identifier set.
    pub entries: BTreeMap<String, BTreeSet<String>>,
}

impl IndexFile {
    /// Builds an index over a document snapshot.
    #[must_use]
    pub fn build(metadata: IndexMetadata, documents: &[Document]) -> Self {
        let mut file = Self {
            metadata,
            entries: BTreeMap::new(),
        };
        for doc in documents {
            if let Some(id) = id_key(doc) {
                let key = composite_key(doc, &file.metadata.fields);
                file.insert(key, id);
            }
        }
        file
    }

    /// The index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Composite key of a document under this index.
    #[must_use]
    pub fn key_for(&self, doc: &Document) -> String {
        composite_key(doc, &self.metadata.fields)
    }

    /// Adds an identifier under a key.
    pub fn insert(&mut self, key: String, id: String) {
        self.entries.entry(key).or_default().insert(id);
    }

    /// Removes an identifier from a key, dropping the key when emptied.
    pub fn remove(&mut self, key: &str, id: &str) -> bool {
        let Some(ids) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    /// Identifiers stored under a key.
    #[must_use]
    pub fn lookup(&self, key: &str) -> BTreeSet<String> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Reads an index file. Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Crypto errors pass through; anything structurally wrong is `Corruption`.
    pub fn load(path: &Path, codec: &EncryptionCodec) -> CoreResult<Option<Self>> {
        let Some(root) = read_document(path, codec)? else {
            return Ok(None);
        };
        let metadata = match root.get(METADATA_FIELD) {
            Some(Value::Document(doc)) => IndexMetadata::from_document(doc)
                .map_err(|e| CoreError::corruption(path, format!("bad metadata: {e}")))?,
            _ => return Err(CoreError::corruption(path, "missing index metadata")),
        };
        let Some(Value::Document(data)) = root.get(DATA_FIELD) else {
            return Err(CoreError::corruption(path, "missing index data"));
        };

        let mut entries = BTreeMap::new();
        for (key, ids) in data.iter() {
            let Value::Array(ids) = ids else {
                return Err(CoreError::corruption(path, format!("key {key} is not a list")));
            };
            let ids: BTreeSet<String> = ids.iter().map(Value::to_key_string).collect();
            if !ids.is_empty() {
                entries.insert(key.to_string(), ids);
            }
        }
        Ok(Some(Self { metadata, entries }))
    }

    /// Writes the index file atomically.
    pub fn save(&self, path: &Path, codec: &EncryptionCodec, sync: bool) -> CoreResult<()> {
        // Map keys are unique, so the fields go in without a lookup each.
        let data = Document::from_distinct_fields(
            self.entries
                .iter()
                .map(|(key, ids)| {
                    let ids = ids.iter().map(|id| Value::Text(id.clone())).collect();
                    (key.clone(), Value::Array(ids))
                })
                .collect(),
        );
        let mut root = Document::with_capacity(2);
        root.insert(METADATA_FIELD, self.metadata.to_document()?);
        root.insert(DATA_FIELD, data);
        write_document(path, codec, &root, sync)?;
        Ok(())
    }
}
