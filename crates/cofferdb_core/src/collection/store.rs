//! Document store for one collection.

use crate::config::{CollectionOptions, IndexOptions, UpdateOptions};
use crate::crypto::EncryptionCodec;
use crate::dir::{CollectionDir, CollectionGuard};
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexChange, IndexEngine, IndexMetadata};
use crate::query::{values_equal, FindOptions, Query, Update};
use crate::sealed::{check_storable, load_documents, save_documents};
use crate::stats::{CollectionStats, OperationCounters};
use cofferdb_codec::{Document, Value};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// State shared by every collection of one open database.
#[derive(Debug)]
pub(crate) struct StoreContext {
    pub(crate) database: String,
    pub(crate) codec: Arc<EncryptionCodec>,
    pub(crate) indexes: IndexEngine,
    pub(crate) counters: OperationCounters,
    pub(crate) sync: bool,
    closed: AtomicBool,
}

impl StoreContext {
    pub(crate) fn new(
        database: String,
        codec: Arc<EncryptionCodec>,
        indexes: IndexEngine,
        sync: bool,
    ) -> Self {
        Self {
            database,
            codec,
            indexes,
            counters: OperationCounters::new(),
            sync,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::DatabaseClosed {
                name: self.database.clone(),
            });
        }
        Ok(())
    }

    /// Marks the database closed. Returns false if it already was.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// Outcome of an update or replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    /// Documents that matched the query.
    pub matched: u64,
    /// Documents whose content changed.
    pub modified: u64,
    /// Identifier of the inserted document, when an upsert inserted one.
    pub upserted_id: Option<Value>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    /// Documents removed.
    pub deleted: u64,
}

fn id_of(doc: &Document) -> Option<String> {
    doc.id().map(Value::to_key_string)
}

/// A collection of schema-less documents persisted as one encrypted file.
///
/// Reads load the current snapshot without locking. Writes hold the
/// collection's exclusive lock for the whole load-mutate-save-index sequence,
/// so writers in other threads, handles or processes never lose updates.
#[derive(Debug)]
pub struct Collection {
    name: String,
    dir: CollectionDir,
    options: CollectionOptions,
    ctx: Arc<StoreContext>,
}

impl Collection {
    pub(crate) fn new(
        name: &str,
        path: PathBuf,
        options: CollectionOptions,
        ctx: Arc<StoreContext>,
    ) -> Self {
        Self {
            name: name.to_string(),
            dir: CollectionDir::new(path),
            options,
            ctx,
        }
    }

    /// Creates the directory and makes sure the default index exists.
    pub(crate) fn open(&self) -> CoreResult<()> {
        self.dir.create()?;
        let guard = self.dir.lock()?;
        let indexes = self.ctx.indexes.indexes(&guard, &self.name)?;
        debug!(
            database = %self.ctx.database,
            collection = %self.name,
            indexes = indexes.len(),
            "opened collection"
        );
        Ok(())
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options given at creation.
    #[must_use]
    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if result.is_err() {
            self.ctx.counters.record_error();
        }
        result
    }

    fn load(&self) -> CoreResult<Vec<Document>> {
        self.ctx.counters.record_read();
        load_documents(&self.dir.data_path(), &self.ctx.codec)
    }

    fn save(&self, _guard: &CollectionGuard<'_>, documents: &[Document]) -> CoreResult<()> {
        let bytes = save_documents(
            &self.dir.data_path(),
            &self.ctx.codec,
            documents,
            self.ctx.sync,
        )?;
        self.ctx.counters.record_bytes_written(bytes);
        Ok(())
    }

    fn matching(&self, query: &Document) -> CoreResult<Vec<Document>> {
        self.ctx.ensure_open()?;
        let query = Query::parse(query)?;
        let mut documents = self.load()?;
        documents.retain(|doc| query.matches(doc));
        Ok(documents)
    }

    // === Inserts ===

    /// Inserts one document, assigning an `_id` if it has none.
    ///
    /// Returns the stored document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the identifier already exists.
    pub fn insert_one(&self, doc: Document) -> CoreResult<Document> {
        let mut inserted = self.insert_many(vec![doc])?;
        inserted
            .pop()
            .ok_or_else(|| CoreError::invalid_operation("insert produced no document"))
    }

    /// Inserts documents in order. Either all are stored or none.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if any identifier already exists in the
    /// collection or appears twice in `docs`.
    pub fn insert_many(&self, docs: Vec<Document>) -> CoreResult<Vec<Document>> {
        self.ctx.ensure_open()?;
        self.track(self.insert_locked(docs))
    }

    fn insert_locked(&self, docs: Vec<Document>) -> CoreResult<Vec<Document>> {
        if docs.is_empty() {
            return Ok(docs);
        }
        let guard = self.dir.lock()?;
        let mut stored = self.load()?;
        let mut seen: HashSet<String> = stored.iter().filter_map(id_of).collect();

        let mut inserted = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = doc.ensure_id();
            check_storable(&doc)?;
            if !seen.insert(id.to_key_string()) {
                return Err(CoreError::invalid_operation(format!(
                    "duplicate _id {} in collection {}",
                    id.to_key_string(),
                    self.name
                )));
            }
            inserted.push(doc);
        }

        stored.extend(inserted.iter().cloned());
        self.save(&guard, &stored)?;
        let changes: Vec<_> = inserted.iter().map(IndexChange::insert).collect();
        self.ctx.indexes.apply(&guard, &self.name, &changes)?;

        self.ctx.counters.record_writes(inserted.len() as u64);
        debug!(collection = %self.name, count = inserted.len(), "inserted documents");
        Ok(inserted)
    }

    // === Reads ===

    /// Returns matching documents, sorted, skipped and limited per `options`.
    pub fn find(&self, query: &Document, options: &FindOptions) -> CoreResult<Vec<Document>> {
        self.track(self.matching(query).map(|mut docs| {
            options.apply(&mut docs);
            docs
        }))
    }

    /// Returns the first match in stored order.
    pub fn find_one(&self, query: &Document) -> CoreResult<Option<Document>> {
        self.track(self.matching(query).map(|docs| docs.into_iter().next()))
    }

    /// Returns the document with the given identifier.
    pub fn find_by_id(&self, id: impl Into<Value>) -> CoreResult<Option<Document>> {
        let mut query = Document::new();
        query.insert(cofferdb_codec::ID_FIELD, id.into());
        self.find_one(&query)
    }

    /// Counts matching documents.
    pub fn count(&self, query: &Document) -> CoreResult<u64> {
        self.track(self.matching(query).map(|docs| docs.len() as u64))
    }

    /// Distinct values of `field` among matching documents, in first-seen
    /// order. Array fields contribute their elements.
    pub fn distinct(&self, field: &str, query: &Document) -> CoreResult<Vec<Value>> {
        let docs = self.track(self.matching(query))?;
        let mut values: Vec<Value> = Vec::new();
        let mut push = |value: &Value| {
            if !values.iter().any(|seen| values_equal(seen, value)) {
                values.push(value.clone());
            }
        };
        for doc in &docs {
            match doc.get_path(field) {
                Some(Value::Array(items)) => items.iter().for_each(&mut push),
                Some(value) => push(value),
                None => {}
            }
        }
        Ok(values)
    }

    // === Updates ===

    /// Updates the first matching document.
    ///
    /// With `upsert` and no match, a document is built by applying the
    /// update to an empty document (or taken from a replacement body) and
    /// inserted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for malformed queries or updates; nothing
    /// is persisted in that case.
    pub fn update_one(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> CoreResult<UpdateResult> {
        self.update(query, update, options, false)
    }

    /// Updates every matching document.
    pub fn update_many(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> CoreResult<UpdateResult> {
        self.update(query, update, options, true)
    }

    /// Replaces the body of the first matching document, keeping its `_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `replacement` contains update operators.
    pub fn replace_one(&self, query: &Document, replacement: Document) -> CoreResult<UpdateResult> {
        self.ctx.ensure_open()?;
        if replacement.keys().any(|k| k.starts_with('$')) {
            return self.track(Err(CoreError::invalid_operation(
                "replacement document must not contain update operators",
            )));
        }
        let result = Query::parse(query)
            .and_then(|query| self.update_locked(&query, &Update::Replace(replacement), false, false));
        self.track(result)
    }

    fn update(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
        multi: bool,
    ) -> CoreResult<UpdateResult> {
        self.ctx.ensure_open()?;
        let result = Query::parse(query).and_then(|query| {
            let update = Update::parse(update)?;
            self.update_locked(&query, &update, options.upsert, multi)
        });
        self.track(result)
    }

    fn update_locked(
        &self,
        query: &Query,
        update: &Update,
        upsert: bool,
        multi: bool,
    ) -> CoreResult<UpdateResult> {
        let guard = self.dir.lock()?;
        let mut stored = self.load()?;
        let mut result = UpdateResult::default();
        let mut previous: Vec<(usize, Document)> = Vec::new();

        for (position, doc) in stored.iter_mut().enumerate() {
            if !query.matches(doc) {
                continue;
            }
            result.matched += 1;
            let mut next = doc.clone();
            update.apply(&mut next)?;
            check_storable(&next)?;
            if next != *doc {
                previous.push((position, std::mem::replace(doc, next)));
            }
            if !multi {
                break;
            }
        }
        result.modified = previous.len() as u64;

        let mut upserted = None;
        if result.matched == 0 && upsert {
            let mut doc = match update {
                Update::Replace(body) => body.clone(),
                Update::Operators(_) => {
                    let mut doc = Document::new();
                    update.apply(&mut doc)?;
                    doc
                }
            };
            let id = doc.ensure_id();
            check_storable(&doc)?;
            let key = id.to_key_string();
            if stored.iter().any(|d| id_of(d).as_deref() == Some(key.as_str())) {
                return Err(CoreError::invalid_operation(format!(
                    "duplicate _id {key} in collection {}",
                    self.name
                )));
            }
            result.upserted_id = Some(id);
            upserted = Some(doc);
        }

        if previous.is_empty() && upserted.is_none() {
            return Ok(result);
        }
        if let Some(doc) = &upserted {
            stored.push(doc.clone());
        }
        self.save(&guard, &stored)?;

        let mut changes: Vec<IndexChange<'_>> = previous
            .iter()
            .map(|(position, old)| IndexChange::update(old, &stored[*position]))
            .collect();
        if let Some(doc) = &upserted {
            changes.push(IndexChange::insert(doc));
        }
        self.ctx.indexes.apply(&guard, &self.name, &changes)?;

        self.ctx.counters.record_writes(changes.len() as u64);
        debug!(
            collection = %self.name,
            matched = result.matched,
            modified = result.modified,
            upserted = result.upserted_id.is_some(),
            "updated documents"
        );
        Ok(result)
    }

    // === Deletes ===

    /// Deletes the first matching document.
    pub fn delete_one(&self, query: &Document) -> CoreResult<DeleteResult> {
        self.delete(query, false)
    }

    /// Deletes every matching document.
    pub fn delete_many(&self, query: &Document) -> CoreResult<DeleteResult> {
        self.delete(query, true)
    }

    fn delete(&self, query: &Document, multi: bool) -> CoreResult<DeleteResult> {
        self.ctx.ensure_open()?;
        let result = Query::parse(query).and_then(|query| self.delete_locked(&query, multi));
        self.track(result)
    }

    fn delete_locked(&self, query: &Query, multi: bool) -> CoreResult<DeleteResult> {
        let guard = self.dir.lock()?;
        let stored = self.load()?;

        let mut kept = Vec::with_capacity(stored.len());
        let mut removed = Vec::new();
        for doc in stored {
            if (multi || removed.is_empty()) && query.matches(&doc) {
                removed.push(doc);
            } else {
                kept.push(doc);
            }
        }
        if removed.is_empty() {
            return Ok(DeleteResult::default());
        }

        self.save(&guard, &kept)?;
        let changes: Vec<_> = removed.iter().map(IndexChange::remove).collect();
        self.ctx.indexes.apply(&guard, &self.name, &changes)?;

        self.ctx.counters.record_deletes(removed.len() as u64);
        debug!(collection = %self.name, count = removed.len(), "deleted documents");
        Ok(DeleteResult {
            deleted: removed.len() as u64,
        })
    }

    // === Indexes ===

    /// Builds an index over `fields` and maintains it on every write.
    pub fn create_index<I>(&self, fields: I, options: IndexOptions) -> CoreResult<IndexMetadata>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.ctx.ensure_open()?;
        let fields = fields.into_iter().map(Into::into).collect();
        let result = self.dir.lock().and_then(|guard| {
            self.ctx
                .indexes
                .create_index(&guard, &self.name, fields, options)
        });
        self.track(result)
    }

    /// Removes an index by name.
    pub fn drop_index(&self, name: &str) -> CoreResult<()> {
        self.ctx.ensure_open()?;
        let result = self
            .dir
            .lock()
            .and_then(|guard| self.ctx.indexes.drop_index(&guard, &self.name, name));
        self.track(result)
    }

    /// Lists index definitions, repairing missing or unreadable index files.
    pub fn indexes(&self) -> CoreResult<Vec<IndexMetadata>> {
        self.ctx.ensure_open()?;
        let result = self
            .dir
            .lock()
            .and_then(|guard| self.ctx.indexes.indexes(&guard, &self.name));
        self.track(result)
    }

    /// Identifiers (rendered as key strings) stored under a composite key.
    pub fn lookup(&self, index: &str, key: &str) -> CoreResult<BTreeSet<String>> {
        self.ctx.ensure_open()?;
        self.ctx.counters.record_index_lookup();
        let result = self.ctx.indexes.lookup(&self.dir, &self.name, index, key);
        self.track(result)
    }

    /// Rebuilds an index from the data file.
    pub fn rebuild_index(&self, name: &str) -> CoreResult<IndexMetadata> {
        self.ctx.ensure_open()?;
        let result = self
            .dir
            .lock()
            .and_then(|guard| self.ctx.indexes.rebuild_index(&guard, &self.name, name));
        self.track(result)
    }

    /// Returns true if an index matches one recomputed from the data file.
    pub fn verify_index(&self, name: &str) -> CoreResult<bool> {
        self.ctx.ensure_open()?;
        let result = self
            .dir
            .lock()
            .and_then(|guard| self.ctx.indexes.verify_index(&guard, &self.name, name));
        self.track(result)
    }

    // === Lifecycle ===

    /// Document count, file sizes and index definitions.
    pub fn stats(&self) -> CoreResult<CollectionStats> {
        self.ctx.ensure_open()?;
        let indexes = self.indexes()?;
        let document_count = self.load()?.len() as u64;
        let data_size = file_size(self.dir.data_path())?;
        let mut index_size = 0;
        for index in &indexes {
            index_size += file_size(self.dir.index_path(&index.name))?;
        }
        Ok(CollectionStats {
            name: self.name.clone(),
            document_count,
            data_size,
            index_size,
            indexes,
            capped_size: self.options.capped_size,
        })
    }

    /// Deletes the collection directory and its cache entries.
    pub(crate) fn drop_files(&self) -> CoreResult<()> {
        {
            let _guard = self.dir.lock()?;
            self.ctx.indexes.forget_collection(&self.name);
        }
        match fs::remove_dir_all(self.dir.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(database = %self.ctx.database, collection = %self.name, "dropped collection");
        Ok(())
    }
}

fn file_size(path: PathBuf) -> CoreResult<u64> {
    match fs::metadata(&path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
