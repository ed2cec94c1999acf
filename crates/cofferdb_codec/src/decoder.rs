//! Binary document decoder.

use crate::document::Document;
use crate::error::{CodecError, CodecResult};
use crate::limits::{MAX_BYTES_LENGTH, MAX_CONTAINER_ELEMENTS, MAX_DEPTH};
use crate::object_id::ObjectId;
use crate::value::Value;
use bson::{RawArray, RawBsonRef, RawDocument};
use std::collections::HashSet;

/// Decode a BSON document, rejecting trailing bytes.
pub fn decode_document(bytes: &[u8]) -> CodecResult<Document> {
    let declared = declared_length(bytes)?;
    if declared < bytes.len() {
        return Err(CodecError::TrailingBytes {
            remaining: bytes.len() - declared,
        });
    }
    let raw = RawDocument::from_bytes(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    DocumentDecoder::new().decode_document(raw)
}

fn declared_length(bytes: &[u8]) -> CodecResult<usize> {
    let prefix: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(CodecError::UnexpectedEof)?;
    let declared = usize::try_from(i32::from_le_bytes(prefix))
        .map_err(|_| CodecError::invalid_structure("negative document length"))?;
    if declared > bytes.len() {
        return Err(CodecError::UnexpectedEof);
    }
    Ok(declared)
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

fn raw_error(e: impl std::fmt::Display) -> CodecError {
    CodecError::decoding_failed(e.to_string())
}

/// Converts borrowed BSON elements into [`Value`]s.
pub struct DocumentDecoder {
    depth: usize,
}

impl DocumentDecoder {
    /// Create a decoder.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decode one element.
    pub fn decode(&mut self, element: RawBsonRef<'_>) -> CodecResult<Value> {
        let value = match element {
            RawBsonRef::Null | RawBsonRef::Undefined => Value::Null,
            RawBsonRef::Boolean(b) => Value::Bool(b),
            RawBsonRef::Int32(n) => Value::Integer(i64::from(n)),
            RawBsonRef::Int64(n) => Value::Integer(n),
            RawBsonRef::Double(f) => Value::Float(f),
            RawBsonRef::String(s) => {
                check_length(s.len())?;
                Value::Text(s.to_string())
            }
            RawBsonRef::Binary(binary) => {
                check_length(binary.bytes.len())?;
                Value::Bytes(binary.bytes.to_vec())
            }
            RawBsonRef::Array(items) => self.decode_array(items)?,
            RawBsonRef::Document(doc) => Value::Document(self.decode_document(doc)?),
            RawBsonRef::ObjectId(id) => Value::ObjectId(ObjectId::from_bytes(id.bytes())),
            RawBsonRef::DateTime(at) => Value::Timestamp(at.timestamp_millis()),
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "unsupported element type {:?}",
                    other.element_type()
                )))
            }
        };
        Ok(value)
    }

    /// Decode a document. Duplicate field names are an error.
    pub fn decode_document(&mut self, raw: &RawDocument) -> CodecResult<Document> {
        self.nested(|decoder| {
            let mut seen = HashSet::new();
            let mut fields = Vec::new();
            for element in raw {
                let (key, value) = element.map_err(raw_error)?;
                if !seen.insert(key) {
                    return Err(CodecError::invalid_structure(format!(
                        "duplicate field name: {key}"
                    )));
                }
                if fields.len() as u64 >= MAX_CONTAINER_ELEMENTS {
                    return Err(CodecError::SizeLimitExceeded {
                        claimed: MAX_CONTAINER_ELEMENTS + 1,
                        max_allowed: MAX_CONTAINER_ELEMENTS,
                    });
                }
                fields.push((key.to_string(), decoder.decode(value)?));
            }
            Ok(Document::from_distinct_fields(fields))
        })
    }

    fn decode_array(&mut self, raw: &RawArray) -> CodecResult<Value> {
        self.nested(|decoder| {
            let mut items = Vec::new();
            for element in raw {
                if items.len() as u64 >= MAX_CONTAINER_ELEMENTS {
                    return Err(CodecError::SizeLimitExceeded {
                        claimed: MAX_CONTAINER_ELEMENTS + 1,
                        max_allowed: MAX_CONTAINER_ELEMENTS,
                    });
                }
                items.push(decoder.decode(element.map_err(raw_error)?)?);
            }
            Ok(Value::Array(items))
        })
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<T>) -> CodecResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::DepthLimitExceeded {
                max_depth: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

impl Default for DocumentDecoder {
    fn default() -> Self {
        Self::new()
    }
}
