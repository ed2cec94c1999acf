//! Engine configuration and per-operation options.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Passphrase value that selects pass-through (unencrypted) mode.
pub const PASSTHROUGH_PASSPHRASE: &str = "none";

/// Configuration shared by every database opened from one data root.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one subdirectory per database.
    pub data_root: PathBuf,

    /// Encryption passphrase. `None` or [`PASSTHROUGH_PASSPHRASE`] disables encryption.
    pub passphrase: Option<String>,

    /// Number of execution contexts used by the task dispatcher.
    pub workers: usize,

    /// Whether execution contexts keep databases open between tasks.
    pub persistent_connections: bool,

    /// Whether to use the external index cache when one is supplied.
    pub use_index_cache: bool,

    /// Whether to fsync data and index files after every write.
    pub sync_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            passphrase: None,
            workers: 1,
            persistent_connections: false,
            use_index_cache: true,
            sync_on_write: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data root directory.
    #[must_use]
    pub fn data_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_root = path.into();
        self
    }

    /// Sets the encryption passphrase.
    #[must_use]
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Sets the number of execution contexts.
    #[must_use]
    pub const fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }

    /// Sets whether execution contexts hold databases open between tasks.
    #[must_use]
    pub const fn persistent_connections(mut self, value: bool) -> Self {
        self.persistent_connections = value;
        self
    }

    /// Sets whether to use the external index cache.
    #[must_use]
    pub const fn use_index_cache(mut self, value: bool) -> Self {
        self.use_index_cache = value;
        self
    }

    /// Sets whether to fsync after every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

/// Options accepted when creating a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Advisory size hint, reported in stats only.
    pub capped_size: Option<u64>,
}

/// Options stored with an index definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Declared uniqueness (persisted, not enforced).
    #[serde(default)]
    pub unique: bool,
    /// Declared sparseness (persisted, not enforced).
    #[serde(default)]
    pub sparse: bool,
}

impl IndexOptions {
    /// Marks the index as unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the index as sparse.
    #[must_use]
    pub const fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }
}

/// Options for update operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches.
    pub upsert: bool,
}

impl UpdateOptions {
    /// Options with upsert enabled.
    #[must_use]
    pub const fn upsert() -> Self {
        Self { upsert: true }
    }
}
