//! Worker pool — claims queued tasks and drives their items to completion.
//!
//! Parallel across tasks, strictly serial within a task: items run in
//! index order, and progress is reported after every item transition.
//! One failed item never aborts its siblings; partial failure is a
//! first-class outcome.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::HandlerError;
use crate::tasks::model::{ItemStatus, Task, TaskStatus};
use crate::tasks::store::TaskStore;
use crate::worker::handler::{HandlerRegistry, OperationHandler};

/// A running pool of worker loops.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` claim loops against the store. Each loop claims at
    /// most one task at a time, so tasks run serially within a worker and
    /// in parallel across workers.
    pub fn spawn(
        store: Arc<TaskStore>,
        handlers: Arc<HandlerRegistry>,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = (0..workers)
            .map(|worker| {
                let store = Arc::clone(&store);
                let handlers = Arc::clone(&handlers);
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(run_loop(worker, store, handlers, poll_interval, shutdown_rx))
            })
            .collect();

        info!(workers, "Worker pool started");
        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Request shutdown and wait for every loop to drain. In-flight items
    /// finish; unclaimed tasks stay queued.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        join_all(self.handles).await;
        info!("Worker pool stopped");
    }
}

async fn run_loop(
    worker: usize,
    store: Arc<TaskStore>,
    handlers: Arc<HandlerRegistry>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker, "Worker loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Some(task) = store.claim_next().await {
            run_task(worker, &store, &handlers, task).await;
            continue;
        }

        // Nothing claimable: sleep until a wake-up, a fallback tick, or
        // shutdown. The tick covers wake-ups that raced the claim above.
        tokio::select! {
            _ = store.wait_for_work() => {}
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    debug!(worker, "Worker loop stopped");
}

/// Drive one claimed task: items strictly in index order, cooperative
/// cancel check before each item, every transition pushed through the
/// store (which broadcasts it).
async fn run_task(
    worker: usize,
    store: &TaskStore,
    handlers: &HandlerRegistry,
    task: Task,
) {
    info!(
        worker,
        task_id = task.id,
        kind = %task.kind,
        items = task.total_items,
        "Task execution started"
    );

    let handler = handlers.get(&task.kind).await;
    if handler.is_none() {
        warn!(task_id = task.id, kind = %task.kind, "No handler registered for task kind");
    }

    for item in &task.items {
        match store.task_status(task.id).await {
            Some(TaskStatus::Canceled) => {
                info!(
                    task_id = task.id,
                    "Task canceled, leaving remaining items queued"
                );
                return;
            }
            Some(_) => {}
            None => {
                // Hard-cleared out from under us
                warn!(task_id = task.id, "Task vanished mid-execution");
                return;
            }
        }

        if let Err(e) = store
            .update_item(task.id, item.id, ItemStatus::Running, None)
            .await
        {
            warn!(task_id = task.id, item_id = item.id, error = %e, "Item start rejected, abandoning task");
            return;
        }

        let outcome = execute_item(&handler, &task.kind, &item.payload).await;

        let (status, result) = match outcome {
            Ok(result) => (ItemStatus::Completed, result),
            Err(e) => {
                warn!(
                    task_id = task.id,
                    item_id = item.id,
                    index = item.index,
                    error = %e,
                    "Item failed"
                );
                (ItemStatus::Failed, json!({"error": e.to_string()}))
            }
        };

        if let Err(e) = store
            .update_item(task.id, item.id, status, Some(result))
            .await
        {
            warn!(task_id = task.id, item_id = item.id, error = %e, "Item finish rejected");
        }
    }
}

/// Run one handler call isolated from the worker loop: the call is
/// spawned so a panic becomes an item failure instead of killing the
/// loop, and the handler's own declared timeout bounds it.
async fn execute_item(
    handler: &Option<Arc<dyn OperationHandler>>,
    kind: &str,
    payload: &Value,
) -> Result<Value, HandlerError> {
    let Some(handler) = handler else {
        return Err(HandlerError::NotRegistered {
            kind: kind.to_string(),
        });
    };

    let timeout = handler.execution_timeout();
    let handler = Arc::clone(handler);
    let payload = payload.clone();
    let mut call = tokio::spawn(async move { handler.execute(&payload).await });

    match tokio::time::timeout(timeout, &mut call).await {
        Err(_) => {
            call.abort();
            Err(HandlerError::Timeout { timeout })
        }
        Ok(Err(join_err)) if join_err.is_panic() => Err(HandlerError::Panicked {
            reason: join_err.to_string(),
        }),
        Ok(Err(join_err)) => Err(HandlerError::Failed {
            reason: join_err.to_string(),
        }),
        Ok(Ok(result)) => result,
    }
}
