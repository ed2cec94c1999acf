//! Task dispatch over independent execution contexts.
//!
//! A [`TaskRequest`] names a database, an optional collection, a
//! [`TaskKind`] and its [`TaskPayload`]. The [`TaskDispatcher`] hands it to
//! one of its execution contexts and returns a [`TaskHandle`] that yields
//! the [`TaskOutput`].
//!
//! Contexts share nothing in memory. Two tasks on the same collection in
//! different contexts serialize on the collection's file lock.

mod dispatcher;
mod task;
mod worker;

pub use dispatcher::{TaskDispatcher, TaskHandle};
pub use task::{TaskId, TaskKind, TaskOutput, TaskPayload, TaskRequest};
pub use worker::WorkerMessage;
