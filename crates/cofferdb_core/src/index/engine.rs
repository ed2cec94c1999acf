//! Index Engine - secondary index maintenance with self-healing.
//!
//! The engine keeps one index file per index next to the collection's data
//! file and mirrors definitions and identifier sets into an optional
//! [`IndexCache`]. Every collection write calls [`IndexEngine::apply`] inside
//! the same locked section that saved the data file.
//!
//! # Invariants
//!
//! - Index files are derivable from the data file and are rebuilt, not
//!   reported, when they are missing or unreadable
//! - Every collection has the default `_id` index
//! - The cache is never authoritative; losing it degrades to files only
//! - A write the cache missed leaves a `CACHE_STALE` marker in the
//!   collection directory; until a handle that reaches the cache republishes
//!   the collection from its files, lookups read the files

use super::cache::IndexCache;
use super::key::{
    collection_set_prefix, definition_field, definition_prefix, definitions_key, fields_from_name,
    fields_from_name_in, id_key, index_set_prefix, set_key, DEFAULT_INDEX,
};
use super::persistence::{IndexFile, IndexMetadata};
use crate::config::IndexOptions;
use crate::crypto::EncryptionCodec;
use crate::dir::{remove_if_exists, CollectionDir, CollectionGuard};
use crate::error::{CoreError, CoreResult};
use crate::sealed::load_documents;
use cofferdb_codec::{Document, ID_FIELD};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One document-level change to reflect in every index.
#[derive(Debug, Clone, Copy)]
pub struct IndexChange<'a> {
    /// The document before the write, if it existed.
    pub old: Option<&'a Document>,
    /// The document after the write, if it still exists.
    pub new: Option<&'a Document>,
}

impl<'a> IndexChange<'a> {
    /// A newly inserted document.
    #[must_use]
    pub fn insert(doc: &'a Document) -> Self {
        Self {
            old: None,
            new: Some(doc),
        }
    }

    /// A modified document.
    #[must_use]
    pub fn update(old: &'a Document, new: &'a Document) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    /// A removed document.
    #[must_use]
    pub fn remove(doc: &'a Document) -> Self {
        Self {
            old: Some(doc),
            new: None,
        }
    }
}

/// Collection snapshot loaded on first use.
struct LazySnapshot<'a> {
    path: PathBuf,
    codec: &'a EncryptionCodec,
    docs: Option<Vec<Document>>,
}

impl<'a> LazySnapshot<'a> {
    fn new(dir: &CollectionDir, codec: &'a EncryptionCodec) -> Self {
        Self {
            path: dir.data_path(),
            codec,
            docs: None,
        }
    }

    fn get(&mut self) -> CoreResult<&[Document]> {
        if self.docs.is_none() {
            self.docs = Some(load_documents(&self.path, self.codec)?);
        }
        Ok(self.docs.as_deref().unwrap_or(&[]))
    }
}

fn is_healable(err: &CoreError) -> bool {
    err.is_crypto() || matches!(err, CoreError::Corruption { .. })
}

/// Secondary index engine for one database.
#[derive(Debug)]
pub struct IndexEngine {
    database: String,
    codec: Arc<EncryptionCodec>,
    cache: Option<Arc<dyn IndexCache>>,
    cache_online: AtomicBool,
    sync: bool,
}

impl IndexEngine {
    /// Creates an engine and checks cache connectivity.
    ///
    /// An unreachable cache is logged once and the engine runs on index
    /// files alone.
    pub fn new(
        database: impl Into<String>,
        codec: Arc<EncryptionCodec>,
        cache: Option<Arc<dyn IndexCache>>,
        sync: bool,
    ) -> Self {
        let engine = Self {
            database: database.into(),
            codec,
            cache_online: AtomicBool::new(cache.is_some()),
            cache,
            sync,
        };
        engine.with_cache("ping", |cache| cache.ping());
        engine
    }

    /// Returns true while the cache is in use.
    #[must_use]
    pub fn cache_online(&self) -> bool {
        self.cache.is_some() && self.cache_online.load(Ordering::Acquire)
    }

    fn with_cache<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn IndexCache) -> CoreResult<T>,
    ) -> Option<T> {
        let cache = self.cache.as_deref()?;
        if !self.cache_online.load(Ordering::Acquire) {
            return None;
        }
        match f(cache) {
            Ok(value) => Some(value),
            Err(err) => {
                if self.cache_online.swap(false, Ordering::AcqRel) {
                    warn!(
                        database = %self.database,
                        op,
                        error = %err,
                        "index cache unavailable, using index files only"
                    );
                }
                None
            }
        }
    }

    /// Pings the cache again after an outage. Returns whether it is in use.
    fn reconnect(&self) -> bool {
        let Some(cache) = self.cache.as_deref() else {
            return false;
        };
        if self.cache_online.load(Ordering::Acquire) {
            return true;
        }
        match cache.ping() {
            Ok(()) => {
                if !self.cache_online.swap(true, Ordering::AcqRel) {
                    info!(database = %self.database, "index cache reachable again");
                }
                true
            }
            Err(err) => {
                debug!(database = %self.database, error = %err, "index cache still unavailable");
                false
            }
        }
    }

    /// Records that an index file changed without the cache following.
    ///
    /// The definition is dropped from the cache if it can be reached, so
    /// other handles read the file; the marker covers the case where it
    /// cannot.
    fn mark_stale(&self, guard: &CollectionGuard<'_>, collection: &str, name: &str) {
        if let Some(cache) = self.cache.as_deref() {
            let _ = cache.hdel(&definitions_key(&self.database), &definition_field(collection, name));
        }
        let marker = guard.dir().cache_stale_path();
        if marker.exists() {
            return;
        }
        match fs::write(&marker, b"") {
            Ok(()) => debug!(database = %self.database, collection, index = name, "marked index cache stale"),
            Err(err) => warn!(
                database = %self.database,
                collection,
                error = %err,
                "could not write stale index cache marker"
            ),
        }
    }

    fn cached_definitions(&self, collection: &str) -> BTreeMap<String, IndexMetadata> {
        let prefix = definition_prefix(collection);
        let Some(all) = self.with_cache("read definitions", |cache| {
            cache.hgetall(&definitions_key(&self.database))
        }) else {
            return BTreeMap::new();
        };

        let mut definitions = BTreeMap::new();
        for (field, json) in all {
            let Some(name) = field.strip_prefix(&prefix) else {
                continue;
            };
            match IndexMetadata::from_json_str(&json) {
                Ok(metadata) => {
                    definitions.insert(name.to_string(), metadata);
                }
                Err(err) => {
                    warn!(database = %self.database, collection, index = name, error = %err, "ignoring unreadable cached index definition");
                }
            }
        }
        definitions
    }

    /// Mirrors a whole index into the cache, replacing stale sets.
    /// Returns false if the cache was not updated.
    fn cache_put(&self, file: &IndexFile) -> bool {
        let collection = &file.metadata.collection;
        let name = file.name();
        self.with_cache("publish index", |cache| {
            let stale = cache.keys_with_prefix(&index_set_prefix(&self.database, collection, name))?;
            cache.del(&stale)?;
            cache.hset(
                &definitions_key(&self.database),
                &definition_field(collection, name),
                &file.metadata.to_json_string()?,
            )?;
            for (key, ids) in &file.entries {
                let ids: Vec<String> = ids.iter().cloned().collect();
                cache.sadd(&set_key(&self.database, collection, name, key), &ids)?;
            }
            Ok(())
        })
        .is_some()
    }

    /// Drops an index from the cache. Returns whether the definition
    /// existed, or `None` if the cache was not reached.
    fn cache_forget(&self, collection: &str, name: &str) -> Option<bool> {
        self.with_cache("drop index", |cache| {
            let existed = cache.hdel(
                &definitions_key(&self.database),
                &definition_field(collection, name),
            )?;
            let sets = cache.keys_with_prefix(&index_set_prefix(&self.database, collection, name))?;
            cache.del(&sets)?;
            Ok(existed)
        })
    }

    /// Definition for an index whose file is unreadable and which the cache
    /// does not know.
    fn recover_metadata(&self, collection: &str, name: &str, documents: &[Document]) -> IndexMetadata {
        let fields = fields_from_name_in(name, documents).unwrap_or_else(|| fields_from_name(name));
        if name != DEFAULT_INDEX && name.contains('_') {
            warn!(
                database = %self.database,
                collection,
                index = name,
                fields = ?fields,
                "index definition recovered from its name"
            );
        }
        let mut recovered = IndexMetadata::new(collection, fields, IndexOptions::default());
        recovered.name = name.to_string();
        recovered
    }

    fn write_index(
        &self,
        guard: &CollectionGuard<'_>,
        metadata: IndexMetadata,
        documents: &[Document],
    ) -> CoreResult<IndexFile> {
        let file = IndexFile::build(metadata, documents);
        file.save(&guard.dir().index_path(file.name()), &self.codec, self.sync)?;
        if !self.cache_put(&file) {
            self.mark_stale(guard, &file.metadata.collection, file.name());
        }
        debug!(
            database = %self.database,
            collection = %file.metadata.collection,
            index = file.name(),
            keys = file.key_count(),
            "built index"
        );
        Ok(file)
    }

    /// Loads every index of a collection, healing what it must.
    ///
    /// Files unknown to the cache are published to it. Unreadable files are
    /// deleted and rebuilt from the data file; indexes the cache knows but
    /// whose files are gone are recreated; the default index is created if
    /// absent.
    ///
    /// A collection marked stale is republished from its files instead, and
    /// cached definitions without a file are forgotten rather than recreated.
    fn load_all(&self, guard: &CollectionGuard<'_>, collection: &str) -> CoreResult<Vec<IndexFile>> {
        let dir = guard.dir();
        let mut snapshot = LazySnapshot::new(dir, &self.codec);
        let republish = self.reconnect() && dir.cache_stale_path().exists();
        let cached = self.cached_definitions(collection);
        let mut loaded: BTreeMap<String, IndexFile> = BTreeMap::new();

        for name in dir.index_names_on_disk()? {
            let path = dir.index_path(&name);
            match IndexFile::load(&path, &self.codec) {
                Ok(Some(file)) => {
                    if republish || !cached.contains_key(&name) {
                        self.cache_put(&file);
                    }
                    loaded.insert(name, file);
                }
                Ok(None) => {}
                Err(err) if is_healable(&err) => {
                    warn!(
                        database = %self.database,
                        collection,
                        index = %name,
                        error = %err,
                        "index file unreadable, rebuilding from data"
                    );
                    // Load the data first so an unreadable data file leaves the index alone.
                    let documents = snapshot.get()?;
                    remove_if_exists(&path)?;
                    let metadata = match cached.get(&name) {
                        Some(metadata) => metadata.clone(),
                        None => self.recover_metadata(collection, &name, documents),
                    };
                    let file = self.write_index(guard, metadata, documents)?;
                    loaded.insert(name, file);
                }
                Err(err) => return Err(err),
            }
        }

        for (name, metadata) in cached {
            if loaded.contains_key(&name) {
                continue;
            }
            if republish {
                let _ = self.cache_forget(collection, &name);
                continue;
            }
            warn!(
                database = %self.database,
                collection,
                index = %name,
                "index file missing, recreating"
            );
            let file = self.write_index(guard, metadata, snapshot.get()?)?;
            loaded.insert(name, file);
        }

        if !loaded.contains_key(DEFAULT_INDEX) {
            let metadata = IndexMetadata::new(
                collection,
                vec![ID_FIELD.to_string()],
                IndexOptions::default().unique(),
            );
            let file = self.write_index(guard, metadata, snapshot.get()?)?;
            loaded.insert(DEFAULT_INDEX.to_string(), file);
        }

        if republish && self.cache_online() {
            remove_if_exists(&dir.cache_stale_path())?;
            info!(
                database = %self.database,
                collection,
                indexes = loaded.len(),
                "republished indexes to cache"
            );
        }
        Ok(loaded.into_values().collect())
    }

    /// Lists index definitions, healing the collection's indexes on the way.
    pub fn indexes(&self, guard: &CollectionGuard<'_>, collection: &str) -> CoreResult<Vec<IndexMetadata>> {
        Ok(self
            .load_all(guard, collection)?
            .into_iter()
            .map(|file| file.metadata)
            .collect())
    }

    /// Builds (or rebuilds) an index over the current data.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `fields` is empty.
    pub fn create_index(
        &self,
        guard: &CollectionGuard<'_>,
        collection: &str,
        fields: Vec<String>,
        options: IndexOptions,
    ) -> CoreResult<IndexMetadata> {
        if fields.is_empty() || fields.iter().any(String::is_empty) {
            return Err(CoreError::invalid_operation("index needs at least one field"));
        }
        let documents = load_documents(&guard.dir().data_path(), &self.codec)?;
        let metadata = IndexMetadata::new(collection, fields, options);
        let file = self.write_index(guard, metadata, &documents)?;
        Ok(file.metadata)
    }

    /// Rebuilds one existing index from the data file.
    pub fn rebuild_index(
        &self,
        guard: &CollectionGuard<'_>,
        collection: &str,
        name: &str,
    ) -> CoreResult<IndexMetadata> {
        let metadata = self.find(guard, collection, name)?.metadata;
        let documents = load_documents(&guard.dir().data_path(), &self.codec)?;
        Ok(self.write_index(guard, metadata, &documents)?.metadata)
    }

    /// Compares a persisted index with one recomputed from the data file.
    pub fn verify_index(&self, guard: &CollectionGuard<'_>, collection: &str, name: &str) -> CoreResult<bool> {
        let persisted = self.find(guard, collection, name)?;
        let documents = load_documents(&guard.dir().data_path(), &self.codec)?;
        let expected = IndexFile::build(persisted.metadata.clone(), &documents);
        Ok(expected.entries == persisted.entries)
    }

    fn find(&self, guard: &CollectionGuard<'_>, collection: &str, name: &str) -> CoreResult<IndexFile> {
        self.load_all(guard, collection)?
            .into_iter()
            .find(|file| file.name() == name)
            .ok_or_else(|| CoreError::IndexNotFound {
                collection: collection.to_string(),
                name: name.to_string(),
            })
    }

    /// Removes an index file and its cache entries.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for the default index and `IndexNotFound`
    /// if neither a file nor a cached definition existed.
    pub fn drop_index(&self, guard: &CollectionGuard<'_>, collection: &str, name: &str) -> CoreResult<()> {
        if name == DEFAULT_INDEX {
            return Err(CoreError::invalid_operation("cannot drop the _id index"));
        }
        let had_file = remove_if_exists(&guard.dir().index_path(name))?;
        let forgotten = self.cache_forget(collection, name);
        if forgotten.is_none() {
            self.mark_stale(guard, collection, name);
        }
        let had_definition = forgotten.unwrap_or(false);
        if !had_file && !had_definition {
            return Err(CoreError::IndexNotFound {
                collection: collection.to_string(),
                name: name.to_string(),
            });
        }
        debug!(database = %self.database, collection, index = name, "dropped index");
        Ok(())
    }

    /// Reflects document changes in every index of the collection.
    ///
    /// Called after the data file was saved, under the same lock. Old keys
    /// are removed before new keys are added so a document never appears
    /// under a stale value.
    pub fn apply(
        &self,
        guard: &CollectionGuard<'_>,
        collection: &str,
        changes: &[IndexChange<'_>],
    ) -> CoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        for mut file in self.load_all(guard, collection)? {
            let mut removed: BTreeMap<String, Vec<String>> = BTreeMap::new();
            let mut added: BTreeMap<String, Vec<String>> = BTreeMap::new();

            for change in changes {
                let old = change.old.and_then(|d| Some((file.key_for(d), id_key(d)?)));
                let new = change.new.and_then(|d| Some((file.key_for(d), id_key(d)?)));
                if old == new {
                    continue;
                }
                if let Some((key, id)) = old {
                    file.remove(&key, &id);
                    removed.entry(key).or_default().push(id);
                }
                if let Some((key, id)) = new {
                    file.insert(key.clone(), id.clone());
                    added.entry(key).or_default().push(id);
                }
            }

            if removed.is_empty() && added.is_empty() {
                continue;
            }
            file.save(&guard.dir().index_path(file.name()), &self.codec, self.sync)?;

            let name = file.name();
            let mirrored = self
                .with_cache("update index", |cache| {
                    for (key, ids) in &removed {
                        cache.srem(&set_key(&self.database, collection, name, key), ids)?;
                    }
                    for (key, ids) in &added {
                        cache.sadd(&set_key(&self.database, collection, name, key), ids)?;
                    }
                    Ok(())
                })
                .is_some();
            if !mirrored {
                self.mark_stale(guard, collection, name);
            }
        }
        Ok(())
    }

    /// Identifiers stored under a composite key.
    ///
    /// Served from the cache when it holds the index, otherwise from the
    /// index file. An unreadable or missing file, or a collection marked
    /// stale, takes the collection lock to heal it, so this must not be
    /// called while holding that lock.
    pub fn lookup(
        &self,
        dir: &CollectionDir,
        collection: &str,
        name: &str,
        key: &str,
    ) -> CoreResult<BTreeSet<String>> {
        if self.reconnect() && dir.cache_stale_path().exists() {
            let guard = dir.lock()?;
            return Ok(self.find(&guard, collection, name)?.lookup(key));
        }
        let cached = self.with_cache("lookup", |cache| {
            let known = cache
                .hget(&definitions_key(&self.database), &definition_field(collection, name))?
                .is_some();
            if !known {
                return Ok(None);
            }
            cache.smembers(&set_key(&self.database, collection, name, key)).map(Some)
        });
        if let Some(Some(ids)) = cached {
            return Ok(ids);
        }

        match IndexFile::load(&dir.index_path(name), &self.codec) {
            Ok(Some(file)) => return Ok(file.lookup(key)),
            Ok(None) => {}
            Err(err) if is_healable(&err) => {}
            Err(err) => return Err(err),
        }
        let guard = dir.lock()?;
        Ok(self.find(&guard, collection, name)?.lookup(key))
    }

    /// Removes every cache entry of a collection.
    pub fn forget_collection(&self, collection: &str) {
        let prefix = definition_prefix(collection);
        self.with_cache("drop collection", |cache| {
            let hash = definitions_key(&self.database);
            for field in cache.hgetall(&hash)?.into_keys() {
                if field.starts_with(&prefix) {
                    cache.hdel(&hash, &field)?;
                }
            }
            let sets = cache.keys_with_prefix(&collection_set_prefix(&self.database, collection))?;
            cache.del(&sets)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cache::{MemoryIndexCache, OfflineIndexCache};
    use crate::sealed::save_documents;
    use serde_json::json;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _temp: TempDir,
        dir: CollectionDir,
        codec: Arc<EncryptionCodec>,
        cache: MemoryIndexCache,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let dir = CollectionDir::new(temp.path().join("users"));
            dir.create().unwrap();
            Self {
                _temp: temp,
                dir,
                codec: Arc::new(EncryptionCodec::new(Some("k"))),
                cache: MemoryIndexCache::new(),
            }
        }

        fn engine(&self) -> IndexEngine {
            IndexEngine::new("app", Arc::clone(&self.codec), Some(Arc::new(self.cache.clone())), false)
        }

        fn offline_engine(&self) -> IndexEngine {
            IndexEngine::new("app", Arc::clone(&self.codec), Some(Arc::new(OfflineIndexCache)), false)
        }

        fn save(&self, docs: &[Document]) {
            save_documents(&self.dir.data_path(), &self.codec, docs, false).unwrap();
        }
    }

    fn person(id: &str, name: &str, age: i64) -> Document {
        Document::from_json(json!({"_id": id, "name": name, "age": age})).unwrap()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn default_index_is_created_on_first_listing() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        let names: Vec<_> = engine
            .indexes(&guard, "users")
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["_id"]);
        assert!(fx.dir.index_path("_id").exists());
    }

    #[test]
    fn create_index_covers_existing_documents() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30), person("b", "Jane", 25)]);
        let engine = fx.engine();
        {
            let guard = fx.dir.lock().unwrap();
            let meta = engine
                .create_index(&guard, "users", fields(&["name", "age"]), IndexOptions::default())
                .unwrap();
            assert_eq!(meta.name, "name_age");
        }
        assert_eq!(engine.lookup(&fx.dir, "users", "name_age", "John|30").unwrap(), ids(&["a"]));
        assert_eq!(fx.cache.smembers("index:app:users:name_age:Jane|25").unwrap(), ids(&["b"]));
    }

    #[test]
    fn apply_moves_ids_between_keys() {
        let fx = Fixture::new();
        let before = person("a", "John", 30);
        let after = person("a", "John", 31);
        fx.save(&[before.clone()]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();

        fx.save(&[after.clone()]);
        engine.apply(&guard, "users", &[IndexChange::update(&before, &after)]).unwrap();
        drop(guard);

        assert!(engine.lookup(&fx.dir, "users", "age", "30").unwrap().is_empty());
        assert_eq!(engine.lookup(&fx.dir, "users", "age", "31").unwrap(), ids(&["a"]));
        assert!(fx.cache.smembers("index:app:users:age:30").unwrap().is_empty());
    }

    #[test]
    fn apply_removes_deleted_documents() {
        let fx = Fixture::new();
        let doc = person("a", "John", 30);
        fx.save(&[doc.clone()]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["name"]), IndexOptions::default()).unwrap();
        fx.save(&[]);
        engine.apply(&guard, "users", &[IndexChange::remove(&doc)]).unwrap();
        drop(guard);
        assert!(engine.lookup(&fx.dir, "users", "name", "John").unwrap().is_empty());
        assert!(engine.lookup(&fx.dir, "users", "_id", "a").unwrap().is_empty());
    }

    #[test]
    fn deleted_index_file_is_recreated_from_cache_definition() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default().sparse()).unwrap();
        fs::remove_file(fx.dir.index_path("age")).unwrap();

        let listed = engine.indexes(&guard, "users").unwrap();
        let age = listed.iter().find(|m| m.name == "age").unwrap();
        assert!(age.options.sparse);
        assert!(fx.dir.index_path("age").exists());
    }

    #[test]
    fn corrupt_index_file_is_rebuilt_without_cache() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let engine = fx.offline_engine();
        assert!(!engine.cache_online());
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();
        fs::write(fx.dir.index_path("age"), b"garbage").unwrap();
        drop(guard);

        assert_eq!(engine.lookup(&fx.dir, "users", "age", "30").unwrap(), ids(&["a"]));
        let guard = fx.dir.lock().unwrap();
        assert!(engine.verify_index(&guard, "users", "age").unwrap());
    }

    #[test]
    fn files_unknown_to_cache_are_published() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        {
            let engine = fx.engine();
            let guard = fx.dir.lock().unwrap();
            engine.create_index(&guard, "users", fields(&["name"]), IndexOptions::default()).unwrap();
        }
        fx.cache.flush();

        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.indexes(&guard, "users").unwrap();
        assert!(fx.cache.hget("db:app:indexes", "users:name").unwrap().is_some());
        assert_eq!(fx.cache.smembers("index:app:users:name:John").unwrap(), ids(&["a"]));
    }

    #[test]
    fn cache_outage_degrades_to_files() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();
        drop(guard);

        fx.cache.set_available(false);
        assert_eq!(engine.lookup(&fx.dir, "users", "age", "30").unwrap(), ids(&["a"]));
        assert!(!engine.cache_online());
    }

    #[test]
    fn cache_is_retried_after_outage() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();
        drop(guard);

        fx.cache.set_available(false);
        engine.lookup(&fx.dir, "users", "age", "30").unwrap();
        assert!(!engine.cache_online());
        fx.cache.set_available(true);

        let guard = fx.dir.lock().unwrap();
        let before = person("a", "John", 30);
        let after = person("a", "John", 31);
        fx.save(&[after.clone()]);
        engine.apply(&guard, "users", &[IndexChange::update(&before, &after)]).unwrap();
        assert!(engine.cache_online());
        assert!(!fx.dir.cache_stale_path().exists());
        assert_eq!(fx.cache.smembers("index:app:users:age:31").unwrap(), ids(&["a"]));
        assert!(fx.cache.smembers("index:app:users:age:30").unwrap().is_empty());
    }

    #[test]
    fn missed_write_marks_stale_until_republished() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let writer = fx.engine();
        let reader = fx.engine();
        let guard = fx.dir.lock().unwrap();
        writer.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();

        fx.cache.set_available(false);
        let before = person("a", "John", 30);
        let after = person("a", "John", 31);
        fx.save(&[after.clone()]);
        writer.apply(&guard, "users", &[IndexChange::update(&before, &after)]).unwrap();
        drop(guard);
        assert!(fx.dir.cache_stale_path().exists());

        // The cache still holds the old set when it comes back.
        fx.cache.set_available(true);
        assert_eq!(fx.cache.smembers("index:app:users:age:30").unwrap(), ids(&["a"]));

        assert!(reader.lookup(&fx.dir, "users", "age", "30").unwrap().is_empty());
        assert_eq!(reader.lookup(&fx.dir, "users", "age", "31").unwrap(), ids(&["a"]));
        assert!(!fx.dir.cache_stale_path().exists());
        assert!(fx.cache.smembers("index:app:users:age:30").unwrap().is_empty());
        assert_eq!(fx.cache.smembers("index:app:users:age:31").unwrap(), ids(&["a"]));
    }

    #[test]
    fn index_dropped_during_outage_is_not_resurrected() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();

        fx.cache.set_available(false);
        engine.drop_index(&guard, "users", "age").unwrap();
        fx.cache.set_available(true);

        let names: Vec<_> = engine
            .indexes(&guard, "users")
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["_id"]);
        assert!(!fx.dir.index_path("age").exists());
        assert!(fx.cache.hget("db:app:indexes", "users:age").unwrap().is_none());
    }

    #[test]
    fn recovered_definition_keeps_underscored_fields() {
        let fx = Fixture::new();
        let doc = Document::from_json(json!({"_id": "a", "created_at": 5})).unwrap();
        fx.save(&[doc]);
        let engine = fx.offline_engine();
        let guard = fx.dir.lock().unwrap();
        engine
            .create_index(&guard, "users", fields(&["created_at"]), IndexOptions::default())
            .unwrap();
        fs::write(fx.dir.index_path("created_at"), b"garbage").unwrap();

        let listed = engine.indexes(&guard, "users").unwrap();
        let recovered = listed.iter().find(|m| m.name == "created_at").unwrap();
        assert_eq!(recovered.fields, fields(&["created_at"]));
        drop(guard);
        assert_eq!(engine.lookup(&fx.dir, "users", "created_at", "5").unwrap(), ids(&["a"]));
    }

    #[test]
    fn drop_index_rules() {
        let fx = Fixture::new();
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();
        assert!(matches!(
            engine.drop_index(&guard, "users", "_id"),
            Err(CoreError::InvalidOperation { .. })
        ));
        engine.drop_index(&guard, "users", "age").unwrap();
        assert!(!fx.dir.index_path("age").exists());
        assert!(matches!(
            engine.drop_index(&guard, "users", "age"),
            Err(CoreError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn verify_detects_drift() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();
        fx.save(&[person("a", "John", 30), person("b", "Jane", 30)]);
        assert!(!engine.verify_index(&guard, "users", "age").unwrap());
        engine.rebuild_index(&guard, "users", "age").unwrap();
        assert!(engine.verify_index(&guard, "users", "age").unwrap());
    }

    #[test]
    fn forget_collection_clears_cache() {
        let fx = Fixture::new();
        fx.save(&[person("a", "John", 30)]);
        let engine = fx.engine();
        let guard = fx.dir.lock().unwrap();
        engine.create_index(&guard, "users", fields(&["age"]), IndexOptions::default()).unwrap();
        engine.forget_collection("users");
        assert!(fx.cache.hgetall("db:app:indexes").unwrap().is_empty());
        assert!(fx.cache.keys_with_prefix("index:app:users:").unwrap().is_empty());
    }
}
