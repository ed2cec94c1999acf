//! Query matching, update operators and result shaping.
//!
//! Queries are parsed once into a closed [`Filter`] tree and then evaluated
//! per document. Unknown query operators evaluate to false; unknown update
//! operators are rejected before anything is persisted.

mod filter;
mod options;
mod update;

pub use filter::{Condition, Filter, Query};
pub use options::{FindOptions, SortOrder};
pub use update::{Update, UpdateOp};

pub(crate) use filter::values_equal;
