//! Task descriptions and their execution against a database.

use crate::collection::{Collection, DeleteResult, UpdateResult};
use crate::config::{CollectionOptions, IndexOptions, UpdateOptions};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexMetadata;
use crate::query::FindOptions;
use crate::stats::{CollectionStats, DatabaseStats};
use cofferdb_codec::Document;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Identifier of a submitted task.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new random task ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operations a task can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Insert one document.
    Insert,
    /// Insert several documents at once.
    InsertMany,
    /// Find matching documents.
    Find,
    /// Find the first matching document.
    FindOne,
    /// Count matching documents.
    Count,
    /// Update the first matching document.
    Update,
    /// Update every matching document.
    UpdateMany,
    /// Delete the first matching document.
    Delete,
    /// Delete every matching document.
    DeleteMany,
    /// Create a secondary index.
    CreateIndex,
    /// Drop a secondary index.
    DropIndex,
    /// Create a collection.
    CreateCollection,
    /// Drop a collection.
    DropCollection,
    /// List the collections of a database.
    ListCollections,
    /// Database or collection statistics.
    Stats,
}

impl TaskKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 15] = [
        Self::Insert,
        Self::InsertMany,
        Self::Find,
        Self::FindOne,
        Self::Count,
        Self::Update,
        Self::UpdateMany,
        Self::Delete,
        Self::DeleteMany,
        Self::CreateIndex,
        Self::DropIndex,
        Self::CreateCollection,
        Self::DropCollection,
        Self::ListCollections,
        Self::Stats,
    ];

    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::InsertMany => "insertMany",
            Self::Find => "find",
            Self::FindOne => "findOne",
            Self::Count => "count",
            Self::Update => "update",
            Self::UpdateMany => "updateMany",
            Self::Delete => "delete",
            Self::DeleteMany => "deleteMany",
            Self::CreateIndex => "createIndex",
            Self::DropIndex => "dropIndex",
            Self::CreateCollection => "createCollection",
            Self::DropCollection => "dropCollection",
            Self::ListCollections => "listCollections",
            Self::Stats => "stats",
        }
    }

    /// Whether the kind may create its target collection.
    #[must_use]
    pub const fn creates_collection(self) -> bool {
        matches!(
            self,
            Self::Insert
                | Self::InsertMany
                | Self::Update
                | Self::UpdateMany
                | Self::CreateIndex
                | Self::CreateCollection
        )
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::unsupported(s))
    }
}

/// Arguments of a task. Which shape is accepted depends on the kind.
#[derive(Debug, Clone, Default)]
pub enum TaskPayload {
    /// No arguments (`DropCollection`, `ListCollections`, `Stats`).
    #[default]
    None,
    /// One document (`Insert`).
    Document(Document),
    /// Several documents (`InsertMany`).
    Documents(Vec<Document>),
    /// A filter with result shaping (`Find`, `FindOne`, `Count`, `Delete`, `DeleteMany`).
    Query {
        /// Filter document.
        filter: Document,
        /// Sort, skip and limit. Only `Find` uses them.
        options: FindOptions,
    },
    /// A filter with an update (`Update`, `UpdateMany`).
    Update {
        /// Filter document.
        filter: Document,
        /// Operator or replacement document.
        update: Document,
        /// Upsert flag.
        options: UpdateOptions,
    },
    /// Index fields (`CreateIndex`).
    Index {
        /// Indexed field paths.
        fields: Vec<String>,
        /// Declared options.
        options: IndexOptions,
    },
    /// An index name (`DropIndex`).
    IndexName(String),
    /// Collection options (`CreateCollection`).
    Collection(CollectionOptions),
}

impl TaskPayload {
    /// A query payload with default find options.
    #[must_use]
    pub fn filter(filter: Document) -> Self {
        Self::Query {
            filter,
            options: FindOptions::default(),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Document(_) => "document",
            Self::Documents(_) => "documents",
            Self::Query { .. } => "query",
            Self::Update { .. } => "update",
            Self::Index { .. } => "index",
            Self::IndexName(_) => "index name",
            Self::Collection(_) => "collection options",
        }
    }
}

/// A unit of work for the dispatcher.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Task identifier, assigned on creation.
    pub id: TaskId,
    /// Target database.
    pub database: String,
    /// Target collection, if the kind needs one.
    pub collection: Option<String>,
    /// Operation to run.
    pub kind: TaskKind,
    /// Operation arguments.
    pub payload: TaskPayload,
}

impl TaskRequest {
    /// Creates a request with no collection and no payload.
    #[must_use]
    pub fn new(database: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: TaskId::new(),
            database: database.into(),
            collection: None,
            kind,
            payload: TaskPayload::None,
        }
    }

    /// Sets the target collection.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: TaskPayload) -> Self {
        self.payload = payload;
        self
    }
}

/// Result of a completed task.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    /// The stored document (`Insert`).
    Inserted(Document),
    /// The stored documents (`InsertMany`).
    InsertedMany(Vec<Document>),
    /// Matching documents (`Find`).
    Documents(Vec<Document>),
    /// First match, if any (`FindOne`).
    Document(Option<Document>),
    /// Number of matches (`Count`).
    Count(u64),
    /// Update outcome (`Update`, `UpdateMany`).
    Updated(UpdateResult),
    /// Delete outcome (`Delete`, `DeleteMany`).
    Deleted(DeleteResult),
    /// The created index (`CreateIndex`).
    Index(IndexMetadata),
    /// Collection names (`ListCollections`).
    Collections(Vec<String>),
    /// Statistics of one collection (`Stats` with a collection).
    CollectionStats(CollectionStats),
    /// Statistics of the database (`Stats` without a collection).
    DatabaseStats(DatabaseStats),
    /// The task completed with nothing to report.
    Done,
}

/// Runs a request against an open database.
pub(crate) fn execute(db: &Database, request: TaskRequest) -> CoreResult<TaskOutput> {
    let TaskRequest {
        collection,
        kind,
        payload,
        ..
    } = request;

    match (kind, payload) {
        (TaskKind::ListCollections, TaskPayload::None) => {
            db.refresh()?;
            db.list_collections().map(TaskOutput::Collections)
        }
        (TaskKind::Stats, TaskPayload::None) if collection.is_none() => {
            db.refresh()?;
            db.stats().map(TaskOutput::DatabaseStats)
        }
        (TaskKind::DropCollection, TaskPayload::None) => {
            let name = require_collection(kind, collection.as_deref())?;
            db.refresh()?;
            db.drop_collection(name).map(|()| TaskOutput::Done)
        }
        (TaskKind::CreateCollection, payload) => {
            let name = require_collection(kind, collection.as_deref())?;
            let options = match payload {
                TaskPayload::None => CollectionOptions::default(),
                TaskPayload::Collection(options) => options,
                other => return Err(payload_mismatch(kind, &other)),
            };
            db.create_collection(name, options).map(|_| TaskOutput::Done)
        }
        (kind, payload) => {
            let name = require_collection(kind, collection.as_deref())?;
            let target = resolve(db, name, kind)?;
            run_on_collection(&target, kind, payload)
        }
    }
}

fn run_on_collection(
    collection: &Collection,
    kind: TaskKind,
    payload: TaskPayload,
) -> CoreResult<TaskOutput> {
    match (kind, payload) {
        (TaskKind::Insert, TaskPayload::Document(doc)) => {
            collection.insert_one(doc).map(TaskOutput::Inserted)
        }
        (TaskKind::InsertMany, TaskPayload::Documents(docs)) => {
            collection.insert_many(docs).map(TaskOutput::InsertedMany)
        }
        (TaskKind::Find, TaskPayload::Query { filter, options }) => {
            collection.find(&filter, &options).map(TaskOutput::Documents)
        }
        (TaskKind::FindOne, TaskPayload::Query { filter, .. }) => {
            collection.find_one(&filter).map(TaskOutput::Document)
        }
        (TaskKind::Count, TaskPayload::Query { filter, .. }) => {
            collection.count(&filter).map(TaskOutput::Count)
        }
        (TaskKind::Update, TaskPayload::Update { filter, update, options }) => collection
            .update_one(&filter, &update, options)
            .map(TaskOutput::Updated),
        (TaskKind::UpdateMany, TaskPayload::Update { filter, update, options }) => collection
            .update_many(&filter, &update, options)
            .map(TaskOutput::Updated),
        (TaskKind::Delete, TaskPayload::Query { filter, .. }) => {
            collection.delete_one(&filter).map(TaskOutput::Deleted)
        }
        (TaskKind::DeleteMany, TaskPayload::Query { filter, .. }) => {
            collection.delete_many(&filter).map(TaskOutput::Deleted)
        }
        (TaskKind::CreateIndex, TaskPayload::Index { fields, options }) => {
            collection.create_index(fields, options).map(TaskOutput::Index)
        }
        (TaskKind::DropIndex, TaskPayload::IndexName(name)) => {
            collection.drop_index(&name).map(|()| TaskOutput::Done)
        }
        (TaskKind::Stats, TaskPayload::None) => collection.stats().map(TaskOutput::CollectionStats),
        (kind, payload) => Err(payload_mismatch(kind, &payload)),
    }
}

/// Finds the target collection, adopting directories created by other
/// handles. Write kinds create the collection when it is still missing.
fn resolve(db: &Database, name: &str, kind: TaskKind) -> CoreResult<Arc<Collection>> {
    match db.collection(name) {
        Ok(collection) => return Ok(collection),
        Err(CoreError::CollectionNotFound { .. }) => {}
        Err(e) => return Err(e),
    }
    db.refresh()?;
    if kind.creates_collection() {
        db.collection_or_create(name)
    } else {
        db.collection(name)
    }
}

fn require_collection(kind: TaskKind, collection: Option<&str>) -> CoreResult<&str> {
    collection.ok_or_else(|| CoreError::invalid_operation(format!("{kind} requires a collection")))
}

fn payload_mismatch(kind: TaskKind, payload: &TaskPayload) -> CoreError {
    CoreError::invalid_operation(format!(
        "{kind} does not accept a {} payload",
        payload.shape()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(value).unwrap()
    }

    fn open(root: &std::path::Path) -> Database {
        let config = Config::new().data_root(root).sync_on_write(false);
        Database::open("app", &config, None).unwrap()
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = "aggregate".parse::<TaskKind>().unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedOperation { kind } if kind == "aggregate"));
    }

    #[test]
    fn insert_creates_collection() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        let request = TaskRequest::new("app", TaskKind::Insert)
            .collection("users")
            .payload(TaskPayload::Document(doc(json!({"name": "John"}))));
        let TaskOutput::Inserted(stored) = execute(&db, request).unwrap() else {
            panic!("expected inserted document");
        };
        assert!(stored.id().is_some());
        assert_eq!(db.list_collections().unwrap(), vec!["users"]);
    }

    #[test]
    fn find_on_missing_collection_fails() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        let request = TaskRequest::new("app", TaskKind::Find)
            .collection("ghosts")
            .payload(TaskPayload::filter(Document::new()));
        assert!(matches!(
            execute(&db, request),
            Err(CoreError::CollectionNotFound { .. })
        ));
        assert!(db.list_collections().unwrap().is_empty());
    }

    #[test]
    fn wrong_payload_is_invalid() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        let request = TaskRequest::new("app", TaskKind::Insert)
            .collection("users")
            .payload(TaskPayload::IndexName("age".into()));
        assert!(matches!(
            execute(&db, request),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn missing_collection_name_is_invalid() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        let request = TaskRequest::new("app", TaskKind::Count).payload(TaskPayload::filter(Document::new()));
        assert!(matches!(
            execute(&db, request),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn stats_with_and_without_collection() {
        let temp = tempdir().unwrap();
        let db = open(temp.path());
        execute(
            &db,
            TaskRequest::new("app", TaskKind::InsertMany)
                .collection("users")
                .payload(TaskPayload::Documents(vec![
                    doc(json!({"a": 1})),
                    doc(json!({"a": 2})),
                ])),
        )
        .unwrap();

        let TaskOutput::CollectionStats(stats) =
            execute(&db, TaskRequest::new("app", TaskKind::Stats).collection("users")).unwrap()
        else {
            panic!("expected collection stats");
        };
        assert_eq!(stats.document_count, 2);

        let TaskOutput::DatabaseStats(stats) =
            execute(&db, TaskRequest::new("app", TaskKind::Stats)).unwrap()
        else {
            panic!("expected database stats");
        };
        assert_eq!(stats.total_documents, 2);
    }
}
