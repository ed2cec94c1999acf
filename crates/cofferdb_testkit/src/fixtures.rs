//! Test fixtures and database helpers.
//!
//! Provides a temporary data root with a matching configuration, plus a
//! few canned document sets used across the test suites.

use cofferdb_core::{Catalog, Config, Database, Document, IndexCache, MemoryIndexCache};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Once};
use tempfile::TempDir;

/// Passphrase used by [`TestRoot::encrypted`].
pub const TEST_PASSPHRASE: &str = "testkit-passphrase";

/// A temporary data root with automatic cleanup.
pub struct TestRoot {
    /// Configuration pointing at the temporary directory.
    pub config: Config,
    /// Shared in-memory index cache.
    pub cache: MemoryIndexCache,
    temp_dir: TempDir,
}

impl TestRoot {
    /// Creates an encrypted data root.
    pub fn encrypted() -> Self {
        Self::with_passphrase(Some(TEST_PASSPHRASE))
    }

    /// Creates a data root in pass-through mode.
    pub fn plain() -> Self {
        Self::with_passphrase(None)
    }

    fn with_passphrase(passphrase: Option<&str>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = Config::new()
            .data_root(temp_dir.path())
            .sync_on_write(false);
        config.passphrase = passphrase.map(str::to_string);
        Self {
            config,
            cache: MemoryIndexCache::new(),
            temp_dir,
        }
    }

    /// The data root directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The shared cache as a trait object.
    pub fn cache_handle(&self) -> Arc<dyn IndexCache> {
        Arc::new(self.cache.clone())
    }

    /// A new catalog over this root. Every call returns an independent
    /// catalog sharing the same files and cache.
    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.config.clone(), Some(self.cache_handle()))
    }

    /// Opens a database directly, outside any catalog.
    pub fn open(&self, name: &str) -> Database {
        Database::open(name, &self.config, Some(self.cache_handle()))
            .expect("Failed to open database")
    }
}

/// Runs a test against a fresh encrypted database named `test`.
///
/// # Example
///
/// ```rust,ignore
/// use cofferdb_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let users = db.collection_or_create("users").unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let root = TestRoot::encrypted();
    let db = root.open("test");
    f(&db)
}

/// Three people with names, ages and tags.
pub fn sample_people() -> Vec<Document> {
    [
        json!({"name": "John", "age": 30, "tags": ["user", "admin"], "address": {"city": "Paris"}}),
        json!({"name": "Jane", "age": 25, "tags": ["user", "premium"], "address": {"city": "Oslo"}}),
        json!({"name": "Bob", "age": 35, "tags": ["user"]}),
    ]
    .into_iter()
    .map(|value| Document::from_json(value).expect("sample documents are objects"))
    .collect()
}

/// Installs a test tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
