//! Limits shared by the encoder and the decoder.
//!
//! Both sides enforce the same numbers: whatever the encoder accepts, the
//! decoder reads back.

/// Maximum nesting of documents and arrays. The top-level document counts
/// as the first level.
pub const MAX_DEPTH: usize = 100;

/// Maximum element count of one array or document.
pub const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum length of one string or binary value, in bytes.
pub const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;
