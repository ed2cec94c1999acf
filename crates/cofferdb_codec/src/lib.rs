//! # CofferDB Codec
//!
//! Document value model and binary document encoding for CofferDB.
//!
//! This crate provides:
//! - [`Value`] and [`Document`], the schema-less document model
//! - [`ObjectId`], the 12-byte document identifier
//! - BSON encoding (via the `bson` crate) that preserves field order
//! - Nesting and size limits shared by the encoder and the decoder
//! - JSON interop for building and rendering documents
//!
//! ## Usage
//!
//! ```
//! use cofferdb_codec::{decode_document, encode_document, Document};
//! use serde_json::json;
//!
//! let doc = Document::from_json(json!({"name": "John", "age": 30})).unwrap();
//! let bytes = encode_document(&doc).unwrap();
//! assert_eq!(decode_document(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod document;
mod encoder;
mod error;
mod json;
pub mod limits;
mod object_id;
mod value;

pub use decoder::{decode_document, DocumentDecoder};
pub use document::{Document, ID_FIELD};
pub use encoder::{check_document, encode_document, DocumentEncoder};
pub use limits::MAX_DEPTH;
pub use error::{CodecError, CodecResult};
pub use object_id::{ObjectId, OBJECT_ID_SIZE};
pub use value::Value;
