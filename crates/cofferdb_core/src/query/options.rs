//! Options for `find`: sort, skip and limit.

use cofferdb_codec::{Document, Value};
use std::cmp::Ordering;

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// Options controlling the shape of a `find` result.
///
/// Applied in fixed order: sort, then skip, then limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Sort keys, most significant first.
    pub sort: Vec<(String, SortOrder)>,
    /// Number of leading results to drop.
    pub skip: usize,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl FindOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an ascending sort key.
    #[must_use]
    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Ascending));
        self
    }

    /// Adds a descending sort key.
    #[must_use]
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push((field.into(), SortOrder::Descending));
        self
    }

    /// Sets the number of results to skip.
    #[must_use]
    pub const fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Sorts, skips and truncates `docs` in place.
    pub fn apply(&self, docs: &mut Vec<Document>) {
        if !self.sort.is_empty() {
            // sort_by is stable; ties keep snapshot order.
            docs.sort_by(|a, b| self.compare(a, b));
        }
        if self.skip > 0 {
            docs.drain(..self.skip.min(docs.len()));
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        const NULL: Value = Value::Null;
        for (field, order) in &self.sort {
            let left = a.get_path(field).unwrap_or(&NULL);
            let right = b.get_path(field).unwrap_or(&NULL);
            let ord = match order {
                SortOrder::Ascending => left.sort_cmp(right),
                SortOrder::Descending => right.sort_cmp(left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
