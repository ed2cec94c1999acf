//! Stress tests for CofferDB.
//!
//! These helpers drive a data root under heavy load and concurrent access,
//! either through independent catalogs or through the task dispatcher.

use crate::fixtures::TestRoot;
use cofferdb_core::{
    Document, TaskDispatcher, TaskKind, TaskPayload, TaskRequest, UpdateOptions,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Database used by the stress helpers.
pub const STRESS_DATABASE: &str = "stress";
/// Collection used by the stress helpers.
pub const STRESS_COLLECTION: &str = "items";

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads or execution contexts.
    pub threads: usize,
    /// Length of the text payload stored in each document.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            payload_size: 64,
        }
    }
}

fn item(seq: usize, payload: &str) -> Document {
    Document::from_json(json!({"_id": seq as i64, "seq": seq as i64, "payload": payload}))
        .expect("stress documents are objects")
}

fn tally(successful: &AtomicUsize, failed: &AtomicUsize, ok: bool) {
    if ok {
        successful.fetch_add(1, Ordering::Relaxed);
    } else {
        failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Run a sequential insert stress test through one catalog.
pub fn stress_sequential_inserts(root: &TestRoot, config: &StressConfig) -> StressTestResult {
    let catalog = root.catalog();
    let payload = "x".repeat(config.payload_size);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    let collection = catalog
        .connect(STRESS_DATABASE)
        .and_then(|db| db.collection_or_create(STRESS_COLLECTION));
    let Ok(collection) = collection else {
        return StressTestResult::new(0, config.operations, start.elapsed());
    };
    for seq in 0..config.operations {
        match collection.insert_one(item(seq, &payload)) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent insert stress test, one independent catalog per thread.
///
/// Every thread writes distinct identifiers into the same collection, so
/// after a clean run the collection holds exactly `operations` documents.
pub fn stress_concurrent_inserts(root: &TestRoot, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;
    let payload = "x".repeat(config.payload_size);

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let catalog = root.catalog();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let payload = payload.clone();

            thread::spawn(move || {
                let collection = catalog
                    .connect(STRESS_DATABASE)
                    .and_then(|db| db.collection_or_create(STRESS_COLLECTION));
                let Ok(collection) = collection else {
                    failed.fetch_add(ops_per_thread, Ordering::Relaxed);
                    return;
                };
                for i in 0..ops_per_thread {
                    let ok = collection
                        .insert_one(item(t * ops_per_thread + i, &payload))
                        .is_ok();
                    tally(&successful, &failed, ok);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run an insert stress test through a task dispatcher with
/// `config.threads` execution contexts.
pub fn stress_dispatched_inserts(root: &TestRoot, config: &StressConfig) -> StressTestResult {
    let dispatcher = TaskDispatcher::new(
        root.config.clone().workers(config.threads),
        Some(root.cache_handle()),
    );
    let payload = "x".repeat(config.payload_size);
    let start = Instant::now();
    if dispatcher.start().is_err() {
        return StressTestResult::new(0, config.operations, start.elapsed());
    }

    let mut failed = 0usize;
    let mut handles = Vec::with_capacity(config.operations);
    for seq in 0..config.operations {
        let request = TaskRequest::new(STRESS_DATABASE, TaskKind::Insert)
            .collection(STRESS_COLLECTION)
            .payload(TaskPayload::Document(item(seq, &payload)));
        match dispatcher.submit(request) {
            Ok(handle) => handles.push(handle),
            Err(_) => failed += 1,
        }
    }

    let mut successful = 0usize;
    for handle in handles {
        match handle.wait() {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }
    let _ = dispatcher.stop();

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed insert/read/update/delete stress test through one catalog.
pub fn stress_mixed_operations(root: &TestRoot, config: &StressConfig) -> StressTestResult {
    let catalog = root.catalog();
    let payload = "x".repeat(config.payload_size);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    let collection = catalog
        .connect(STRESS_DATABASE)
        .and_then(|db| db.collection_or_create(STRESS_COLLECTION));
    let Ok(collection) = collection else {
        return StressTestResult::new(0, config.operations, start.elapsed());
    };

    for i in 0..config.operations {
        let by_id = Document::from_json(json!({"_id": (i / 4) as i64}))
            .expect("stress documents are objects");
        let ok = match i % 4 {
            0 => collection.insert_one(item(i / 4, &payload)).is_ok(),
            1 => collection.find_one(&by_id).is_ok(),
            2 => {
                let update = Document::from_json(json!({"$inc": {"seq": 1}}))
                    .expect("stress documents are objects");
                collection
                    .update_one(&by_id, &update, UpdateOptions::default())
                    .is_ok()
            }
            _ => collection.delete_one(&by_id).is_ok(),
        };
        if ok {
            successful += 1;
        } else {
            failed += 1;
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(root: &TestRoot) -> u64 {
        root.catalog()
            .connect(STRESS_DATABASE)
            .unwrap()
            .collection(STRESS_COLLECTION)
            .unwrap()
            .count(&Document::new())
            .unwrap()
    }

    #[test]
    fn test_sequential_inserts() {
        let root = TestRoot::encrypted();
        let config = StressConfig {
            operations: 50,
            ..Default::default()
        };

        let result = stress_sequential_inserts(&root, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 50);
        assert_eq!(stored(&root), 50);
    }

    #[test]
    fn test_concurrent_inserts() {
        let root = TestRoot::encrypted();
        let config = StressConfig {
            operations: 80,
            threads: 4,
            payload_size: 16,
        };

        let result = stress_concurrent_inserts(&root, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(stored(&root), 80);
    }

    #[test]
    fn test_dispatched_inserts() {
        let root = TestRoot::plain();
        let config = StressConfig {
            operations: 60,
            threads: 3,
            payload_size: 16,
        };

        let result = stress_dispatched_inserts(&root, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(stored(&root), 60);
    }

    #[test]
    fn test_mixed_operations() {
        let root = TestRoot::encrypted();
        let config = StressConfig {
            operations: 40,
            ..Default::default()
        };

        let result = stress_mixed_operations(&root, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(stored(&root), 0);
    }
}
