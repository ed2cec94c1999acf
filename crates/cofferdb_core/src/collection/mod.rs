//! Collections: durable CRUD and query evaluation over one document set.
//!
//! A collection is a directory holding an encrypted snapshot of all its
//! documents plus one file per secondary index. See [`crate::dir`] for the
//! layout and locking rules.

mod store;

pub use store::{Collection, DeleteResult, UpdateResult};

pub(crate) use store::StoreContext;
