//! Encrypted document files.
//!
//! Data and index files share one on-disk shape: a single encoded document,
//! passed through the database's [`EncryptionCodec`], replaced atomically.

use crate::crypto::EncryptionCodec;
use crate::dir::write_atomic;
use crate::error::{CoreError, CoreResult};
use cofferdb_codec::{check_document, decode_document, encode_document, Document, Value, MAX_DEPTH};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Field holding the document list in a data file.
pub const DOCUMENTS_FIELD: &str = "documents";

/// Nesting levels the snapshot wrapper adds above each stored document.
const SNAPSHOT_LEVELS: usize = 2;

/// Checks that a document fits in a snapshot and can be read back.
///
/// # Errors
///
/// Returns `InvalidOperation` if the document nests too deeply, exceeds a
/// size limit or has a field name the encoding cannot represent.
pub fn check_storable(doc: &Document) -> CoreResult<()> {
    check_document(doc, MAX_DEPTH - SNAPSHOT_LEVELS)
        .map_err(|e| CoreError::invalid_operation(format!("document cannot be stored: {e}")))
}

/// Reads and decrypts a file. Returns `None` if it does not exist.
///
/// # Errors
///
/// Crypto errors are returned as-is; a payload that decrypts but does not
/// decode is reported as `Corruption`.
pub fn read_document(path: &Path, codec: &EncryptionCodec) -> CoreResult<Option<Document>> {
    let sealed = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let plain = codec.decrypt(&sealed)?;
    decode_document(&plain)
        .map(Some)
        .map_err(|e| CoreError::corruption(path, e.to_string()))
}

/// Encodes, encrypts and atomically writes a document.
///
/// Returns the number of bytes written.
pub fn write_document(
    path: &Path,
    codec: &EncryptionCodec,
    doc: &Document,
    sync: bool,
) -> CoreResult<u64> {
    let plain = encode_document(doc)?;
    let sealed = codec.encrypt(&plain)?;
    write_atomic(path, &sealed, sync)?;
    debug!(path = %path.display(), bytes = sealed.len(), "wrote file");
    Ok(sealed.len() as u64)
}

/// Loads a collection snapshot. A missing file is an empty collection.
pub fn load_documents(path: &Path, codec: &EncryptionCodec) -> CoreResult<Vec<Document>> {
    let Some(mut root) = read_document(path, codec)? else {
        return Ok(Vec::new());
    };
    let items = match root.remove(DOCUMENTS_FIELD) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(CoreError::corruption(
                path,
                format!("{DOCUMENTS_FIELD} is {}, expected array", other.type_name()),
            ))
        }
        None => return Err(CoreError::corruption(path, "missing documents field")),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Document(doc) => Ok(doc),
            other => Err(CoreError::corruption(
                path,
                format!("snapshot entry is {}, expected document", other.type_name()),
            )),
        })
        .collect()
}

/// Replaces a collection snapshot. Returns the file size.
pub fn save_documents(
    path: &Path,
    codec: &EncryptionCodec,
    documents: &[Document],
    sync: bool,
) -> CoreResult<u64> {
    let mut root = Document::with_capacity(1);
    root.insert(
        DOCUMENTS_FIELD,
        Value::Array(documents.iter().cloned().map(Value::Document).collect()),
    );
    let bytes = write_document(path, codec, &root, sync)?;
    debug!(path = %path.display(), count = documents.len(), "saved snapshot");
    Ok(bytes)
}
