//! Database handle: one directory of collections sharing a codec and index cache.

use crate::collection::{Collection, StoreContext};
use crate::config::{CollectionOptions, Config};
use crate::crypto::EncryptionCodec;
use crate::dir::validate_name;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexCache, IndexEngine};
use crate::stats::{CountersSnapshot, DatabaseStats};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// An open database.
///
/// `Database` owns the directory `<data_root>/<name>`, the encryption codec
/// derived from the configured passphrase and the index cache connection.
/// It is a registry of open [`Collection`] handles.
///
/// # Opening a Database
///
/// ```rust,ignore
/// use cofferdb_core::{Config, Database, MemoryIndexCache};
/// use std::sync::Arc;
///
/// let config = Config::new().data_root("data").passphrase("secret");
/// let db = Database::open("app", &config, Some(Arc::new(MemoryIndexCache::new())))?;
///
/// let users = db.create_collection("users", Default::default())?;
/// users.insert_one(doc)?;
///
/// db.close()?;
/// ```
///
/// Several handles may be open on the same directory at once (one per
/// execution context); collection writes are serialized through the
/// per-collection lock file.
pub struct Database {
    name: String,
    path: PathBuf,
    ctx: Arc<StoreContext>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Opens (creating if needed) a database under `config.data_root`.
    ///
    /// Initialization creates the directory, runs the encryption self-test,
    /// connects the index cache, then opens every existing collection and
    /// makes sure each has its default index.
    ///
    /// An unreachable cache is not an error; indexes then live in files only.
    /// Passing `None`, or setting `use_index_cache` to false, runs file-only
    /// from the start.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an unusable name, `SelfTestFailed` (or
    /// a crypto error) if the codec round trip fails, and I/O or crypto
    /// errors from opening existing collections.
    pub fn open(
        name: &str,
        config: &Config,
        cache: Option<Arc<dyn IndexCache>>,
    ) -> CoreResult<Self> {
        validate_name("database", name)?;
        let path = config.data_root.join(name);
        fs::create_dir_all(&path)?;

        let codec = Arc::new(EncryptionCodec::new(config.passphrase.as_deref()));
        codec.self_test()?;

        let cache = cache.filter(|_| config.use_index_cache);
        let indexes = IndexEngine::new(name, Arc::clone(&codec), cache, config.sync_on_write);
        let ctx = Arc::new(StoreContext::new(
            name.to_string(),
            codec,
            indexes,
            config.sync_on_write,
        ));

        let db = Self {
            name: name.to_string(),
            path,
            ctx,
            collections: RwLock::new(HashMap::new()),
        };
        let discovered = db.refresh()?;
        info!(
            database = %db.name,
            encrypted = db.is_encrypted(),
            cache = db.ctx.indexes.cache_online(),
            collections = discovered,
            "opened database"
        );
        Ok(db)
    }

    /// The database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if files are encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.ctx.codec.is_encrypted()
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ctx.ensure_open().is_ok()
    }

    /// Returns true while the index cache is in use.
    #[must_use]
    pub fn cache_online(&self) -> bool {
        self.ctx.indexes.cache_online()
    }

    /// Opens collection directories on disk that are not registered yet.
    ///
    /// Returns the number of collections registered afterwards. Picks up
    /// collections created through other handles.
    pub fn refresh(&self) -> CoreResult<usize> {
        self.ctx.ensure_open()?;
        for name in collection_dirs(&self.path)? {
            if self.collections.read().contains_key(&name) {
                continue;
            }
            self.register(&name, CollectionOptions::default())?;
        }
        Ok(self.collections.read().len())
    }

    fn register(&self, name: &str, options: CollectionOptions) -> CoreResult<Arc<Collection>> {
        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let collection = Arc::new(Collection::new(
            name,
            self.path.join(name),
            options,
            Arc::clone(&self.ctx),
        ));
        collection.open()?;
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// Returns the collection, creating it if needed.
    ///
    /// Idempotent: an already open collection is returned as-is and
    /// `options` are ignored.
    pub fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> CoreResult<Arc<Collection>> {
        self.ctx.ensure_open()?;
        validate_name("collection", name)?;
        if let Some(existing) = self.collections.read().get(name) {
            return Ok(Arc::clone(existing));
        }
        let collection = self.register(name, options)?;
        debug!(database = %self.name, collection = name, "created collection");
        Ok(collection)
    }

    /// Returns an open collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if no collection of that name is open.
    pub fn collection(&self, name: &str) -> CoreResult<Arc<Collection>> {
        self.ctx.ensure_open()?;
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::collection_not_found(name))
    }

    /// Returns the collection, creating it with default options if needed.
    pub fn collection_or_create(&self, name: &str) -> CoreResult<Arc<Collection>> {
        self.create_collection(name, CollectionOptions::default())
    }

    /// Names of open collections, sorted.
    pub fn list_collections(&self) -> CoreResult<Vec<String>> {
        self.ctx.ensure_open()?;
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Deletes a collection's files and index state.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if it is neither open nor on disk.
    pub fn drop_collection(&self, name: &str) -> CoreResult<()> {
        self.ctx.ensure_open()?;
        validate_name("collection", name)?;
        let registered = self.collections.write().remove(name);
        let collection = match registered {
            Some(collection) => collection,
            None if self.path.join(name).is_dir() => Arc::new(Collection::new(
                name,
                self.path.join(name),
                CollectionOptions::default(),
                Arc::clone(&self.ctx),
            )),
            None => return Err(CoreError::collection_not_found(name)),
        };
        collection.drop_files()
    }

    /// Aggregated statistics for every open collection.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        self.ctx.ensure_open()?;
        let mut collections: Vec<Arc<Collection>> =
            self.collections.read().values().cloned().collect();
        collections.sort_by(|a, b| a.name().cmp(b.name()));
        let collections = collections
            .iter()
            .map(|c| c.stats())
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(DatabaseStats::new(
            &self.name,
            self.is_encrypted(),
            self.cache_online(),
            collections,
            self.counters(),
        ))
    }

    /// Current operation counters.
    #[must_use]
    pub fn counters(&self) -> CountersSnapshot {
        self.ctx.counters.snapshot()
    }

    /// Closes the database. Safe to call more than once.
    ///
    /// Afterwards every operation, including through collection handles
    /// obtained earlier, fails with `DatabaseClosed`.
    pub fn close(&self) -> CoreResult<()> {
        if !self.ctx.close() {
            return Ok(());
        }
        self.collections.write().clear();
        info!(database = %self.name, "closed database");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Subdirectories of a database directory that look like collections.
fn collection_dirs(path: &Path) -> CoreResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if validate_name("collection", name).is_ok() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
