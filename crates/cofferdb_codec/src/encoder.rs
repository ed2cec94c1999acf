//! Binary document encoder.
//!
//! Documents are written as BSON through the `bson` crate:
//! - `Integer` is always `int64`, `Float` is `double`
//! - `Bytes` is generic binary (subtype `0x00`)
//! - `ObjectId` is the native 12-byte object id
//! - `Timestamp` is a UTC datetime in milliseconds
//!
//! Field order is preserved. The encoder refuses anything the decoder
//! would refuse (see [`crate::limits`]).

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use crate::limits::{MAX_BYTES_LENGTH, MAX_CONTAINER_ELEMENTS, MAX_DEPTH};
use crate::value::Value;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson};

/// Encode a document to BSON bytes.
pub fn encode_document(doc: &Document) -> CodecResult<Vec<u8>> {
    let bson = DocumentEncoder::new().encode_document(doc)?;
    let mut bytes = Vec::with_capacity(64 * doc.len().max(1));
    bson.to_writer(&mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

/// Checks that a document stays within the codec limits when it may use at
/// most `max_depth` levels of nesting, itself included.
///
/// Callers that embed documents inside a wrapper pass [`MAX_DEPTH`] minus
/// the wrapper's levels.
pub fn check_document(doc: &Document, max_depth: usize) -> CodecResult<()> {
    DocumentEncoder::with_max_depth(max_depth)
        .encode_document(doc)
        .map(drop)
}

fn check_length(len: usize) -> CodecResult<()> {
    let len = len as u64;
    if len > MAX_BYTES_LENGTH {
        return Err(CodecError::SizeLimitExceeded {
            claimed: len,
            max_allowed: MAX_BYTES_LENGTH,
        });
    }
    Ok(())
}

fn check_elements(count: usize) -> CodecResult<()> {
    let count = count as u64;
    if count > MAX_CONTAINER_ELEMENTS {
        return Err(CodecError::SizeLimitExceeded {
            claimed: count,
            max_allowed: MAX_CONTAINER_ELEMENTS,
        });
    }
    Ok(())
}

/// Converts values into BSON elements, tracking nesting depth.
pub struct DocumentEncoder {
    depth: usize,
    max_depth: usize,
}

impl DocumentEncoder {
    /// Create an encoder with the default depth limit.
    pub fn new() -> Self {
        Self::with_max_depth(MAX_DEPTH)
    }

    /// Create an encoder that accepts at most `max_depth` nested levels.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth: max_depth.min(MAX_DEPTH),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<Bson> {
        let bson = match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Integer(n) => Bson::Int64(*n),
            Value::Float(f) => Bson::Double(*f),
            Value::Text(s) => {
                check_length(s.len())?;
                Bson::String(s.clone())
            }
            Value::Bytes(b) => {
                check_length(b.len())?;
                Bson::Binary(Binary {
                    subtype: BinarySubtype::Generic,
                    bytes: b.clone(),
                })
            }
            Value::Array(items) => self.nested(|encoder| {
                check_elements(items.len())?;
                items
                    .iter()
                    .map(|item| encoder.encode(item))
                    .collect::<CodecResult<Vec<_>>>()
                    .map(Bson::Array)
            })?,
            Value::Document(doc) => Bson::Document(self.encode_document(doc)?),
            Value::ObjectId(id) => Bson::ObjectId(bson::oid::ObjectId::from_bytes(*id.as_bytes())),
            Value::Timestamp(ms) => Bson::DateTime(bson::DateTime::from_millis(*ms)),
        };
        Ok(bson)
    }

    /// Encode a document.
    pub fn encode_document(&mut self, doc: &Document) -> CodecResult<bson::Document> {
        self.nested(|encoder| {
            check_elements(doc.len())?;
            let mut out = bson::Document::new();
            for (key, value) in doc.iter() {
                if key.contains('\0') {
                    return Err(CodecError::invalid_structure(format!(
                        "field name {key:?} contains a NUL byte"
                    )));
                }
                out.insert(key, encoder.encode(value)?);
            }
            Ok(out)
        })
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthLimitExceeded {
                max_depth: self.max_depth,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

impl Default for DocumentEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_document;
    use crate::object_id::ObjectId;

    /// `{"v": {"v": ... {"v": 1}}}` with `levels` documents in total.
    fn nested_document(levels: usize) -> Document {
        let mut doc = Document::new();
        doc.insert("v", 1);
        for _ in 1..levels {
            let mut outer = Document::new();
            outer.insert("v", doc);
            doc = outer;
        }
        doc
    }

    #[test]
    fn output_is_bson() {
        let mut doc = Document::new();
        doc.insert("a", 1);
        let bytes = encode_document(&doc).unwrap();
        // int32 length, int64 element "a", terminator
        assert_eq!(
            bytes,
            vec![16, 0, 0, 0, 0x12, b'a', 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn native_types_for_ids_and_timestamps() {
        let id = ObjectId::from_bytes([7; 12]);
        let mut doc = Document::new();
        doc.insert("_id", id);
        doc.insert("at", Value::Timestamp(1_700_000_000_000));
        doc.insert("blob", vec![1u8, 2]);

        let bson = DocumentEncoder::new().encode_document(&doc).unwrap();
        assert_eq!(
            bson.get("_id"),
            Some(&Bson::ObjectId(bson::oid::ObjectId::from_bytes([7; 12])))
        );
        assert_eq!(
            bson.get("at"),
            Some(&Bson::DateTime(bson::DateTime::from_millis(1_700_000_000_000)))
        );
        assert!(matches!(bson.get("blob"), Some(Bson::Binary(b)) if b.bytes == vec![1, 2]));
    }

    #[test]
    fn encode_keeps_field_order() {
        let mut doc = Document::new();
        doc.insert("bb", 2);
        doc.insert("a", 1);
        let bson = DocumentEncoder::new().encode_document(&doc).unwrap();
        assert_eq!(bson.keys().collect::<Vec<_>>(), vec!["bb", "a"]);
    }

    #[test]
    fn depth_limit_matches_decoder() {
        let deepest = nested_document(MAX_DEPTH);
        let bytes = encode_document(&deepest).unwrap();
        assert_eq!(decode_document(&bytes).unwrap(), deepest);

        let too_deep = nested_document(MAX_DEPTH + 1);
        assert_eq!(
            encode_document(&too_deep).unwrap_err(),
            CodecError::DepthLimitExceeded {
                max_depth: MAX_DEPTH
            }
        );
    }

    #[test]
    fn check_document_reserves_wrapper_levels() {
        let doc = nested_document(MAX_DEPTH - 1);
        assert!(check_document(&doc, MAX_DEPTH).is_ok());
        assert!(matches!(
            check_document(&doc, MAX_DEPTH - 2),
            Err(CodecError::DepthLimitExceeded { .. })
        ));
    }

    #[test]
    fn nul_in_field_name_is_rejected() {
        let mut doc = Document::new();
        doc.insert("a\0b", 1);
        assert!(matches!(
            encode_document(&doc),
            Err(CodecError::InvalidStructure { .. })
        ));
    }
}
