//! The task dispatcher.

use super::task::{execute, TaskId, TaskOutput, TaskRequest};
use super::worker::{ExecutionContext, WorkerCommand, WorkerMessage};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

type Pending = Arc<Mutex<HashMap<TaskId, Sender<CoreResult<TaskOutput>>>>>;

/// Receipt for a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    receiver: Receiver<CoreResult<TaskOutput>>,
}

impl TaskHandle {
    /// The task's identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Blocks until the task completes.
    ///
    /// # Errors
    ///
    /// Returns the task's error, or `DispatcherStopped` if the dispatcher
    /// shut down before the task reported back.
    pub fn wait(self) -> CoreResult<TaskOutput> {
        self.receiver
            .recv()
            .unwrap_or(Err(CoreError::DispatcherStopped))
    }
}

struct Worker {
    commands: Sender<WorkerCommand>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    running: bool,
    workers: Vec<Worker>,
    collector: Option<JoinHandle<()>>,
}

/// Spreads tasks over a fixed set of execution contexts.
///
/// Each context is an OS thread with its own database handles. Contexts
/// never share in-memory state; they coordinate through the per-collection
/// file lock and the index cache, like independent processes would.
///
/// With `workers <= 1` no threads are started and tasks run on the
/// caller's thread against a catalog owned by the dispatcher. In that mode
/// errors keep their original variant; from a context they arrive as
/// `TaskFailed` carrying the rendered message.
///
/// # Usage
///
/// ```rust,ignore
/// let dispatcher = TaskDispatcher::new(Config::new().workers(4), Some(cache));
/// dispatcher.start()?;
///
/// let request = TaskRequest::new("app", TaskKind::Insert)
///     .collection("users")
///     .payload(TaskPayload::Document(doc));
/// let output = dispatcher.execute(request)?;
///
/// dispatcher.stop()?;
/// ```
pub struct TaskDispatcher {
    config: Config,
    cache: Option<Arc<dyn IndexCache>>,
    inline: Option<Catalog>,
    state: Mutex<State>,
    pending: Pending,
    next: AtomicU64,
}

impl TaskDispatcher {
    /// Creates a stopped dispatcher.
    #[must_use]
    pub fn new(config: Config, cache: Option<Arc<dyn IndexCache>>) -> Self {
        let inline = (config.workers <= 1).then(|| Catalog::new(config.clone(), cache.clone()));
        Self {
            config,
            cache,
            inline,
            state: Mutex::new(State::default()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next: AtomicU64::new(0),
        }
    }

    /// Number of execution contexts, zero in inline mode.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.state.lock().workers.len()
    }

    /// Returns true between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Number of tasks submitted to contexts and not yet reported.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Starts the execution contexts and waits until each reports ready.
    /// Starting a running dispatcher does nothing.
    pub fn start(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.running {
            return Ok(());
        }
        if self.inline.is_some() {
            state.running = true;
            info!("task dispatcher started inline");
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let pending = Arc::clone(&self.pending);
        let collector = thread::Builder::new()
            .name("cofferdb-collector".to_string())
            .spawn(move || collect(&events_rx, &ready_tx, &pending))?;
        state.collector = Some(collector);

        for worker in 0..self.config.workers {
            let (commands_tx, commands_rx) = mpsc::channel();
            let context = ExecutionContext::new(worker, self.config.clone(), self.cache.clone());
            let events = events_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("cofferdb-worker-{worker}"))
                .spawn(move || context.run(commands_rx, events));
            match spawned {
                Ok(thread) => state.workers.push(Worker {
                    commands: commands_tx,
                    thread,
                }),
                Err(e) => {
                    drop(events_tx);
                    shutdown(&mut state);
                    return Err(e.into());
                }
            }
        }
        drop(events_tx);

        for _ in 0..state.workers.len() {
            if ready_rx.recv().is_err() {
                shutdown(&mut state);
                return Err(CoreError::TaskFailed {
                    message: "execution context exited during startup".to_string(),
                });
            }
        }
        state.running = true;
        info!(workers = state.workers.len(), "task dispatcher started");
        Ok(())
    }

    /// Submits a task and returns a handle to wait on.
    ///
    /// Tasks are assigned to contexts round-robin.
    ///
    /// # Errors
    ///
    /// Returns `DispatcherStopped` if the dispatcher is not running.
    pub fn submit(&self, request: TaskRequest) -> CoreResult<TaskHandle> {
        let state = self.state.lock();
        if !state.running {
            return Err(CoreError::DispatcherStopped);
        }
        let id = request.id;
        let (tx, receiver) = mpsc::channel();

        if let Some(catalog) = &self.inline {
            drop(state);
            debug!(task = %id, kind = %request.kind, "running task inline");
            let result = catalog
                .connect(&request.database)
                .and_then(|db| execute(&db, request));
            // The handle below owns the receiver.
            let _ = tx.send(result);
            return Ok(TaskHandle { id, receiver });
        }

        let slot = self.next.fetch_add(1, Ordering::Relaxed) as usize % state.workers.len();
        self.pending.lock().insert(id, tx);
        debug!(task = %id, kind = %request.kind, worker = slot, "dispatching task");
        if state.workers[slot]
            .commands
            .send(WorkerCommand::Run(request))
            .is_err()
        {
            self.pending.lock().remove(&id);
            return Err(CoreError::DispatcherStopped);
        }
        Ok(TaskHandle { id, receiver })
    }

    /// Submits a task and waits for its result.
    pub fn execute(&self, request: TaskRequest) -> CoreResult<TaskOutput> {
        self.submit(request)?.wait()
    }

    /// Shuts down every context and fails tasks that did not report back.
    ///
    /// Tasks already queued on a context finish first. Idempotent.
    pub fn stop(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if !state.running {
            return Ok(());
        }
        state.running = false;

        if let Some(catalog) = &self.inline {
            catalog.close_all()?;
            info!("task dispatcher stopped");
            return Ok(());
        }

        shutdown(&mut state);
        let orphaned: Vec<_> = self.pending.lock().drain().collect();
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "failing tasks left pending at shutdown");
        }
        for (_, tx) in orphaned {
            let _ = tx.send(Err(CoreError::DispatcherStopped));
        }
        info!("task dispatcher stopped");
        Ok(())
    }
}

impl Drop for TaskDispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "failed to stop task dispatcher");
        }
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("workers", &self.config.workers)
            .field("inline", &self.inline.is_some())
            .field("running", &self.is_running())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Sends shutdown to every context and joins them, then the collector.
fn shutdown(state: &mut State) {
    for worker in &state.workers {
        let _ = worker.commands.send(WorkerCommand::Shutdown);
    }
    for worker in state.workers.drain(..) {
        if worker.thread.join().is_err() {
            warn!("execution context panicked");
        }
    }
    // The collector exits once every context has dropped its sender.
    if let Some(collector) = state.collector.take() {
        if collector.join().is_err() {
            warn!("task collector panicked");
        }
    }
}

/// Routes context messages to waiting tasks. Each id is delivered once.
fn collect(events: &Receiver<WorkerMessage>, ready: &Sender<usize>, pending: &Pending) {
    for message in events {
        let (id, result) = match message {
            WorkerMessage::Ready { worker } => {
                let _ = ready.send(worker);
                continue;
            }
            WorkerMessage::Result { id, output } => (id, Ok(output)),
            WorkerMessage::Error { id, message } => (id, Err(CoreError::TaskFailed { message })),
        };
        match pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(task = %id, "dropping result for unknown task"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{TaskKind, TaskPayload};
    use crate::index::MemoryIndexCache;
    use cofferdb_codec::Document;
    use serde_json::json;
    use tempfile::tempdir;

    fn config(root: &std::path::Path, workers: usize) -> Config {
        Config::new()
            .data_root(root)
            .passphrase("secret")
            .workers(workers)
            .sync_on_write(false)
    }

    fn insert(n: i64) -> TaskRequest {
        TaskRequest::new("app", TaskKind::Insert)
            .collection("users")
            .payload(TaskPayload::Document(
                Document::from_json(json!({"n": n})).unwrap(),
            ))
    }

    fn count() -> TaskRequest {
        TaskRequest::new("app", TaskKind::Count)
            .collection("users")
            .payload(TaskPayload::filter(Document::new()))
    }

    #[test]
    fn submit_before_start_fails() {
        let temp = tempdir().unwrap();
        let dispatcher = TaskDispatcher::new(config(temp.path(), 2), None);
        assert!(matches!(
            dispatcher.submit(insert(1)),
            Err(CoreError::DispatcherStopped)
        ));
    }

    #[test]
    fn inline_mode_keeps_error_variants() {
        let temp = tempdir().unwrap();
        let dispatcher = TaskDispatcher::new(config(temp.path(), 1), None);
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.worker_count(), 0);

        dispatcher.execute(insert(1)).unwrap();
        let TaskOutput::Count(n) = dispatcher.execute(count()).unwrap() else {
            panic!("expected count");
        };
        assert_eq!(n, 1);

        let missing = TaskRequest::new("app", TaskKind::Find)
            .collection("ghosts")
            .payload(TaskPayload::filter(Document::new()));
        assert!(matches!(
            dispatcher.execute(missing),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn workers_do_not_lose_writes() {
        let temp = tempdir().unwrap();
        let cache = MemoryIndexCache::new();
        let dispatcher = TaskDispatcher::new(config(temp.path(), 4), Some(Arc::new(cache)));
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.worker_count(), 4);

        let handles: Vec<TaskHandle> = (0..40)
            .map(|n| dispatcher.submit(insert(n)).unwrap())
            .collect();
        for handle in handles {
            assert!(matches!(handle.wait().unwrap(), TaskOutput::Inserted(_)));
        }

        let TaskOutput::Count(n) = dispatcher.execute(count()).unwrap() else {
            panic!("expected count");
        };
        assert_eq!(n, 40);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[test]
    fn persistent_contexts_see_each_others_collections() {
        let temp = tempdir().unwrap();
        let dispatcher = TaskDispatcher::new(
            config(temp.path(), 3).persistent_connections(true),
            None,
        );
        dispatcher.start().unwrap();
        for n in 0..9 {
            dispatcher.execute(insert(n)).unwrap();
        }
        for _ in 0..3 {
            let TaskOutput::Count(n) = dispatcher.execute(count()).unwrap() else {
                panic!("expected count");
            };
            assert_eq!(n, 9);
        }
    }

    #[test]
    fn context_errors_arrive_as_task_failed() {
        let temp = tempdir().unwrap();
        let dispatcher = TaskDispatcher::new(config(temp.path(), 2), None);
        dispatcher.start().unwrap();
        let bad = TaskRequest::new("app", TaskKind::DropIndex)
            .collection("ghosts")
            .payload(TaskPayload::IndexName("age".into()));
        let err = dispatcher.execute(bad).unwrap_err();
        assert!(matches!(err, CoreError::TaskFailed { message } if message.contains("ghosts")));
    }

    #[test]
    fn stop_is_idempotent_and_rejects_new_tasks() {
        let temp = tempdir().unwrap();
        let dispatcher = TaskDispatcher::new(config(temp.path(), 2), None);
        dispatcher.start().unwrap();
        let handle = dispatcher.submit(insert(1)).unwrap();

        dispatcher.stop().unwrap();
        dispatcher.stop().unwrap();
        assert!(!dispatcher.is_running());
        assert_eq!(dispatcher.worker_count(), 0);

        // Queued work finishes before the contexts exit.
        assert!(handle.wait().is_ok());
        assert!(matches!(
            dispatcher.submit(insert(2)),
            Err(CoreError::DispatcherStopped)
        ));
    }

    #[test]
    fn restart_after_stop() {
        let temp = tempdir().unwrap();
        let dispatcher = TaskDispatcher::new(config(temp.path(), 2), None);
        dispatcher.start().unwrap();
        dispatcher.execute(insert(1)).unwrap();
        dispatcher.stop().unwrap();

        dispatcher.start().unwrap();
        let TaskOutput::Count(n) = dispatcher.execute(count()).unwrap() else {
            panic!("expected count");
        };
        assert_eq!(n, 1);
    }
}
