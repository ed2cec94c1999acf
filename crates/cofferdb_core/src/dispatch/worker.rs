//! Execution contexts: one OS thread each, talking to the dispatcher over
//! channels.

use super::task::{execute, TaskId, TaskOutput, TaskRequest};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::database::Database;
use crate::error::CoreResult;
use crate::index::IndexCache;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, warn};

/// Dispatcher-to-context commands.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Run one task and report its outcome.
    Run(TaskRequest),
    /// Finish queued work and exit.
    Shutdown,
}

/// Context-to-dispatcher messages.
#[derive(Debug)]
pub enum WorkerMessage {
    /// The context is up and accepting commands.
    Ready {
        /// Index of the context.
        worker: usize,
    },
    /// A task completed.
    Result {
        /// The completed task.
        id: TaskId,
        /// Its output.
        output: TaskOutput,
    },
    /// A task failed.
    Error {
        /// The failed task.
        id: TaskId,
        /// Rendered error.
        message: String,
    },
}

/// State owned by one execution context thread.
pub(crate) struct ExecutionContext {
    worker: usize,
    config: Config,
    cache: Option<Arc<dyn IndexCache>>,
    catalog: Option<Catalog>,
}

impl ExecutionContext {
    pub(crate) fn new(worker: usize, config: Config, cache: Option<Arc<dyn IndexCache>>) -> Self {
        let catalog = config
            .persistent_connections
            .then(|| Catalog::new(config.clone(), cache.clone()));
        Self {
            worker,
            config,
            cache,
            catalog,
        }
    }

    /// Serves commands until shutdown or until the dispatcher goes away.
    pub(crate) fn run(self, commands: Receiver<WorkerCommand>, events: Sender<WorkerMessage>) {
        if events.send(WorkerMessage::Ready { worker: self.worker }).is_err() {
            return;
        }
        debug!(worker = self.worker, "execution context ready");

        while let Ok(command) = commands.recv() {
            let request = match command {
                WorkerCommand::Run(request) => request,
                WorkerCommand::Shutdown => break,
            };
            let id = request.id;
            let kind = request.kind;
            let message = match self.execute(request) {
                Ok(output) => WorkerMessage::Result { id, output },
                Err(e) => {
                    debug!(worker = self.worker, task = %id, %kind, error = %e, "task failed");
                    WorkerMessage::Error {
                        id,
                        message: e.to_string(),
                    }
                }
            };
            if events.send(message).is_err() {
                break;
            }
        }

        if let Some(catalog) = &self.catalog {
            if let Err(e) = catalog.close_all() {
                warn!(worker = self.worker, error = %e, "failed to close databases");
            }
        }
        debug!(worker = self.worker, "execution context stopped");
    }

    fn execute(&self, request: TaskRequest) -> CoreResult<TaskOutput> {
        if let Some(catalog) = &self.catalog {
            let db = catalog.connect(&request.database)?;
            return execute(&db, request);
        }
        let db = Database::open(&request.database, &self.config, self.cache.clone())?;
        let result = execute(&db, request);
        let closed = db.close();
        let output = result?;
        closed?;
        Ok(output)
    }
}
