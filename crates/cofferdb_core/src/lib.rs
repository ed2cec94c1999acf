//! # CofferDB Core
//!
//! Embedded, encrypted, file-backed document database engine.
//!
//! This crate provides:
//! - Encryption at rest for every data and index file
//! - Collections with insert, query, update and delete over schema-less documents
//! - Secondary indexes persisted to disk and mirrored into an optional cache
//!   (in process or Redis)
//! - A catalog of databases under one data root
//! - A task dispatcher spreading operations over independent execution contexts
//!
//! ## Layout
//!
//! ```text
//! <data_root>/<database>/<collection>/data.bson
//! <data_root>/<database>/<collection>/_index_<name>.bson
//! <data_root>/<database>/<collection>/LOCK
//! <data_root>/<database>/<collection>/CACHE_STALE   (only while the index cache lags the files)
//! ```
//!
//! ## Usage
//!
//! ```
//! use cofferdb_core::{Catalog, Config, Document, FindOptions};
//! use serde_json::json;
//!
//! let root = tempfile::tempdir().unwrap();
//! let catalog = Catalog::new(Config::new().data_root(root.path()).passphrase("secret"), None);
//!
//! let db = catalog.connect("app").unwrap();
//! let users = db.collection_or_create("users").unwrap();
//! users
//!     .insert_one(Document::from_json(json!({"name": "John", "age": 30})).unwrap())
//!     .unwrap();
//!
//! let query = Document::from_json(json!({"age": {"$gte": 18}})).unwrap();
//! let adults = users.find(&query, &FindOptions::default()).unwrap();
//! assert_eq!(adults.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod collection;
mod config;
pub mod crypto;
mod database;
mod dir;
pub mod dispatch;
mod error;
pub mod index;
pub mod query;
mod sealed;
mod stats;

pub use catalog::Catalog;
pub use collection::{Collection, DeleteResult, UpdateResult};
pub use config::{CollectionOptions, Config, IndexOptions, UpdateOptions, PASSTHROUGH_PASSPHRASE};
pub use crypto::{EncryptionCodec, EncryptionMode};
pub use database::Database;
pub use dispatch::{TaskDispatcher, TaskHandle, TaskId, TaskKind, TaskOutput, TaskPayload, TaskRequest};
pub use error::{CoreError, CoreResult};
pub use index::{IndexCache, IndexMetadata, MemoryIndexCache, OfflineIndexCache, RedisIndexCache};
pub use query::{FindOptions, SortOrder};
pub use stats::{CollectionStats, CountersSnapshot, DatabaseStats, OperationCounters};

pub use cofferdb_codec::{Document, ObjectId, Value};
