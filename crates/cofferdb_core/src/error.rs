//! Error types for CofferDB core.

use cofferdb_codec::CodecError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in CofferDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Document codec error outside of a file load (e.g. encoding).
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A persisted file could not be decoded.
    #[error("corrupted file {}: {message}", path.display())]
    Corruption {
        /// The file that failed to decode.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed.
    #[error("decryption failed: {message}")]
    DecryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// The encryption round trip at startup did not match.
    #[error("encryption self-test failed")]
    SelfTestFailed,

    /// The index cache could not be reached.
    #[error("index cache unavailable: {message}")]
    CacheUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// Database not found.
    #[error("database not found: {name}")]
    DatabaseNotFound {
        /// Name of the database.
        name: String,
    },

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// Index not found.
    #[error("index not found: {name} on collection {collection}")]
    IndexNotFound {
        /// Owning collection.
        collection: String,
        /// Name of the index.
        name: String,
    },

    /// Operation kind is not known to the dispatcher.
    #[error("unsupported operation: {kind}")]
    UnsupportedOperation {
        /// The rejected operation name.
        kind: String,
    },

    /// Operation not permitted with the given arguments or in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database handle has been closed.
    #[error("database is closed: {name}")]
    DatabaseClosed {
        /// Name of the database.
        name: String,
    },

    /// The dispatcher is not running.
    #[error("task dispatcher is stopped")]
    DispatcherStopped,

    /// A task failed inside an execution context.
    #[error("task failed: {message}")]
    TaskFailed {
        /// Rendered error from the execution context.
        message: String,
    },
}

impl CoreError {
    /// Creates a corruption error for a file.
    pub fn corruption(path: &Path, message: impl Into<String>) -> Self {
        Self::Corruption {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(message: impl Into<String>) -> Self {
        Self::DecryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a cache unavailable error.
    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            message: message.into(),
        }
    }

    /// Creates a collection not found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(kind: impl Into<String>) -> Self {
        Self::UnsupportedOperation { kind: kind.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for encryption and decryption failures.
    #[must_use]
    pub fn is_crypto(&self) -> bool {
        matches!(
            self,
            Self::EncryptionFailed { .. } | Self::DecryptionFailed { .. } | Self::SelfTestFailed
        )
    }

    /// Returns true for the not-found family.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DatabaseNotFound { .. }
                | Self::CollectionNotFound { .. }
                | Self::IndexNotFound { .. }
        )
    }

    /// Returns true for I/O errors that mean the file does not exist.
    #[must_use]
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(CoreError::decryption_failed("x").is_crypto());
        assert!(CoreError::SelfTestFailed.is_crypto());
        assert!(!CoreError::collection_not_found("c").is_crypto());
        assert!(CoreError::collection_not_found("c").is_not_found());
        assert!(CoreError::from(io::Error::from(io::ErrorKind::NotFound)).is_missing_file());
    }

    #[test]
    fn corruption_message_names_file() {
        let err = CoreError::corruption(Path::new("/tmp/x/data.bson"), "bad map");
        assert_eq!(err.to_string(), "corrupted file /tmp/x/data.bson: bad map");
    }
}
