//! Database statistics.
//!
//! Two kinds of numbers are reported:
//! - [`OperationCounters`]: atomic counters bumped as operations run
//! - [`CollectionStats`] / [`DatabaseStats`]: point-in-time reports computed
//!   from the files on disk
//!
//! # Usage
//!
//! ```rust,ignore
//! let db = catalog.connect("app")?;
//! db.collection("users")?.insert_one(doc)?;
//!
//! let stats = db.stats()?;
//! println!("documents: {}", stats.total_documents);
//! println!("writes: {}", stats.operations.writes);
//! ```

use crate::index::IndexMetadata;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters for one database handle.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct OperationCounters {
    /// Snapshot loads performed for reads.
    reads: AtomicU64,
    /// Documents inserted, updated or replaced.
    writes: AtomicU64,
    /// Documents deleted.
    deletes: AtomicU64,
    /// Index lookups served.
    index_lookups: AtomicU64,
    /// Encrypted bytes written to data files.
    bytes_written: AtomicU64,
    /// Operations that returned an error.
    errors: AtomicU64,
}

impl OperationCounters {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_writes(&self, documents: u64) {
        self.writes.fetch_add(documents, Ordering::Relaxed);
    }

    pub(crate) fn record_deletes(&self, documents: u64) {
        self.deletes.fetch_add(documents, Ordering::Relaxed);
    }

    pub(crate) fn record_index_lookup(&self) {
        self.index_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of snapshot reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of documents written.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of documents deleted.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the number of index lookups.
    pub fn index_lookups(&self) -> u64 {
        self.index_lookups.load(Ordering::Relaxed)
    }

    /// Returns the number of data-file bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Returns the number of failed operations.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            deletes: self.deletes(),
            index_lookups: self.index_lookups(),
            bytes_written: self.bytes_written(),
            errors: self.errors(),
        }
    }
}

/// A point-in-time copy of [`OperationCounters`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    /// Snapshot reads.
    pub reads: u64,
    /// Documents written.
    pub writes: u64,
    /// Documents deleted.
    pub deletes: u64,
    /// Index lookups.
    pub index_lookups: u64,
    /// Data-file bytes written.
    pub bytes_written: u64,
    /// Failed operations.
    pub errors: u64,
}

/// Report for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of stored documents.
    pub document_count: u64,
    /// Size of the data file in bytes, as stored (encrypted).
    pub data_size: u64,
    /// Combined size of the index files in bytes.
    pub index_size: u64,
    /// Index definitions, sorted by name.
    pub indexes: Vec<IndexMetadata>,
    /// Size hint given at creation, if any.
    pub capped_size: Option<u64>,
}

/// Report for one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Database name.
    pub name: String,
    /// Whether files are encrypted.
    pub encrypted: bool,
    /// Whether the index cache is in use.
    pub cache_online: bool,
    /// Per-collection reports, sorted by name.
    pub collections: Vec<CollectionStats>,
    /// Sum of document counts.
    pub total_documents: u64,
    /// Sum of data and index file sizes.
    pub total_size: u64,
    /// Operation counters of this handle.
    pub operations: CountersSnapshot,
}

impl DatabaseStats {
    pub(crate) fn new(
        name: &str,
        encrypted: bool,
        cache_online: bool,
        collections: Vec<CollectionStats>,
        operations: CountersSnapshot,
    ) -> Self {
        let total_documents = collections.iter().map(|c| c.document_count).sum();
        let total_size = collections.iter().map(|c| c.data_size + c.index_size).sum();
        Self {
            name: name.to_string(),
            encrypted,
            cache_online,
            collections,
            total_documents,
            total_size,
            operations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_counters_are_zero() {
        let counters = OperationCounters::new();
        assert_eq!(counters.snapshot(), CountersSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let counters = OperationCounters::new();
        counters.record_read();
        counters.record_writes(3);
        counters.record_deletes(2);
        counters.record_bytes_written(128);
        counters.record_error();

        let snap = counters.snapshot();
        assert_eq!(snap.reads, 1);
        assert_eq!(snap.writes, 3);
        assert_eq!(snap.deletes, 2);
        assert_eq!(snap.bytes_written, 128);
        assert_eq!(snap.errors, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let counters = Arc::new(OperationCounters::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let c = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..100 {
                        c.record_read();
                        c.record_writes(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.reads(), 1000);
        assert_eq!(counters.writes(), 1000);
    }

    #[test]
    fn database_totals() {
        let collection = |name: &str, docs, size| CollectionStats {
            name: name.to_string(),
            document_count: docs,
            data_size: size,
            index_size: 10,
            indexes: Vec::new(),
            capped_size: None,
        };
        let stats = DatabaseStats::new(
            "app",
            true,
            false,
            vec![collection("a", 2, 100), collection("b", 3, 50)],
            CountersSnapshot::default(),
        );
        assert_eq!(stats.total_documents, 5);
        assert_eq!(stats.total_size, 170);
    }
}
