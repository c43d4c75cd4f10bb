//! Task store — authoritative task state, state machine enforcement, and
//! change broadcasting.
//!
//! Every mutation broadcasts the updated task snapshot on an embedded
//! broadcast channel before returning, under the same lock acquisition,
//! so observers and store can never disagree about what changed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Notify, RwLock, broadcast};
use tracing::{debug, info, warn};

use super::model::{ItemStatus, Scope, Task, TaskItem, TaskStatus, TaskStreamMessage};
use crate::error::TaskError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// In-memory task store backed by a broadcast channel for fan-out to
/// stream observers.
pub struct TaskStore {
    tasks: RwLock<Vec<Task>>,
    next_task_id: AtomicU64,
    next_item_id: AtomicU64,
    tx: broadcast::Sender<TaskStreamMessage>,
    /// Woken whenever a task becomes claimable.
    work_available: Notify,
}

impl TaskStore {
    /// Create a new store with the default broadcast capacity.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a new store with an explicit broadcast capacity.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(capacity);
        Arc::new(Self {
            tasks: RwLock::new(Vec::new()),
            next_task_id: AtomicU64::new(1),
            next_item_id: AtomicU64::new(1),
            tx,
            work_available: Notify::new(),
        })
    }

    /// Subscribe to task-change events. Each stream observer calls this;
    /// a receiver that lags behind the ring sees `RecvError::Lagged` and
    /// is expected to re-sync from a fresh snapshot.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskStreamMessage> {
        self.tx.subscribe()
    }

    /// Wait until a task may have become claimable. Workers pair this
    /// with a periodic fallback tick to cover missed wake-ups.
    pub async fn wait_for_work(&self) {
        self.work_available.notified().await;
    }

    fn publish(&self, task: Task) {
        // Ok if no observers are listening yet
        let _ = self.tx.send(TaskStreamMessage::TaskUpdate { task });
    }

    /// Enqueue a new task. Items are materialized `queued` in payload
    /// order; an empty payload list is rejected before any state exists.
    pub async fn enqueue(
        &self,
        kind: impl Into<String>,
        payloads: Vec<Value>,
        meta: Value,
    ) -> Result<Task, TaskError> {
        if payloads.is_empty() {
            return Err(TaskError::InvalidTask {
                reason: "a task needs at least one item".to_string(),
            });
        }

        let kind = kind.into();
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let items: Vec<TaskItem> = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| TaskItem {
                id: self.next_item_id.fetch_add(1, Ordering::Relaxed),
                index,
                status: ItemStatus::Queued,
                payload,
                result: None,
                started_at: None,
                finished_at: None,
            })
            .collect();

        let task = Task {
            id,
            kind: kind.clone(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_items: items.len(),
            completed_items: 0,
            meta,
            items,
        };

        info!(task_id = id, kind = %kind, items = task.total_items, "Task enqueued");

        let snapshot = task.clone();
        {
            // Publish under the write lock so broadcast order always
            // matches mutation order; last-write-wins clients depend on it.
            let mut tasks = self.tasks.write().await;
            tasks.push(task);
            self.publish(snapshot.clone());
        }
        self.work_available.notify_one();

        Ok(snapshot)
    }

    /// Atomically claim the oldest queued task, flipping it to `running`.
    /// Safe under concurrent callers: the write lock makes select-and-flip
    /// one step, so no task is ever claimed twice.
    pub async fn claim_next(&self) -> Option<Task> {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.iter_mut().find(|t| t.status == TaskStatus::Queued)?;
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            let snapshot = task.clone();
            self.publish(snapshot.clone());
            snapshot
        };

        info!(task_id = snapshot.id, kind = %snapshot.kind, "Task claimed");
        Some(snapshot)
    }

    /// Transition one item and recompute task-level progress. Once every
    /// item is terminal the task itself goes terminal: `completed` with
    /// zero item failures, `failed` otherwise.
    ///
    /// A canceled task still accepts the terminal transition of its
    /// in-flight item (handler calls are not preemptible, so the result
    /// arrives after the cancel), but no item may *start* on it.
    pub async fn update_item(
        &self,
        task_id: u64,
        item_id: u64,
        status: ItemStatus,
        result: Option<Value>,
    ) -> Result<Task, TaskError> {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or(TaskError::NotFound { id: task_id })?;

            if task.status != TaskStatus::Running
                && !(task.status == TaskStatus::Canceled && status.is_terminal())
            {
                return Err(TaskError::InvalidTransition {
                    id: task_id,
                    state: task.status.to_string(),
                    target: format!("item {item_id} -> {status}"),
                });
            }

            let task_status = task.status;
            let item = task
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or(TaskError::ItemNotFound { task_id, item_id })?;

            if !item.status.can_transition_to(status) {
                return Err(TaskError::InvalidTransition {
                    id: task_id,
                    state: item.status.to_string(),
                    target: status.to_string(),
                });
            }

            item.status = status;
            match status {
                ItemStatus::Running => item.started_at = Some(Utc::now()),
                ItemStatus::Completed | ItemStatus::Failed => {
                    item.finished_at = Some(Utc::now());
                    item.result = result;
                }
                ItemStatus::Queued => {}
            }

            task.completed_items = task
                .items
                .iter()
                .filter(|i| i.status.is_terminal())
                .count();

            let all_terminal = task.items.iter().all(|i| i.status.is_terminal());
            if task_status == TaskStatus::Running && all_terminal {
                task.status = if task.has_failed_items() {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Completed
                };
                task.finished_at = Some(Utc::now());
                info!(
                    task_id,
                    status = %task.status,
                    completed_items = task.completed_items,
                    "Task finished"
                );
            }

            let snapshot = task.clone();
            self.publish(snapshot.clone());
            snapshot
        };

        Ok(snapshot)
    }

    /// Cancel a task if it is still active. Canceling an already-terminal
    /// task is a no-op, not an error — the request may simply have raced
    /// with natural completion.
    pub async fn cancel(&self, task_id: u64) -> Result<Task, TaskError> {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or(TaskError::NotFound { id: task_id })?;

            if !task.status.is_active() {
                debug!(task_id, status = %task.status, "Cancel is a no-op, task already terminal");
                task.clone()
            } else {
                task.status = TaskStatus::Canceled;
                task.finished_at = Some(Utc::now());
                info!(task_id, "Task canceled");
                let snapshot = task.clone();
                self.publish(snapshot.clone());
                snapshot
            }
        };

        Ok(snapshot)
    }

    /// Soft-delete a terminal task: retained for history queries, excluded
    /// from the current view. Active tasks must be canceled first.
    pub async fn soft_delete(&self, task_id: u64) -> Result<Task, TaskError> {
        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or(TaskError::NotFound { id: task_id })?;

            if task.status == TaskStatus::Deleted {
                return Ok(task.clone());
            }
            if !task.status.can_transition_to(TaskStatus::Deleted) {
                warn!(task_id, status = %task.status, "Refusing to delete an active task");
                return Err(TaskError::InvalidTransition {
                    id: task_id,
                    state: task.status.to_string(),
                    target: TaskStatus::Deleted.to_string(),
                });
            }

            task.status = TaskStatus::Deleted;
            info!(task_id, "Task soft-deleted");
            let snapshot = task.clone();
            self.publish(snapshot.clone());
            snapshot
        };

        Ok(snapshot)
    }

    /// Cancel an active task, or soft-delete a terminal one. Backs the
    /// single DELETE endpoint. A task finishing between the status read
    /// and the cancel is fine: cancel tolerates terminal tasks as a no-op.
    pub async fn cancel_or_delete(&self, task_id: u64) -> Result<Task, TaskError> {
        let status = self
            .task_status(task_id)
            .await
            .ok_or(TaskError::NotFound { id: task_id })?;
        if status.is_active() {
            self.cancel(task_id).await
        } else {
            self.soft_delete(task_id).await
        }
    }

    /// Get a full task snapshot by ID.
    pub async fn get(&self, task_id: u64) -> Option<Task> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }

    /// Get just the status of a task. Workers use this for the cheap
    /// cooperative-cancel check between items.
    pub async fn task_status(&self, task_id: u64) -> Option<TaskStatus> {
        self.tasks
            .read()
            .await
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.status)
    }

    /// List task snapshots for one view scope, newest first.
    pub async fn list(&self, scope: Scope) -> Vec<Task> {
        let mut out: Vec<Task> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| match scope {
                Scope::Current => t.is_current(),
                Scope::History => !t.is_current(),
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        out
    }

    /// Clear a view scope. `Current` soft-deletes every terminal task in
    /// the current view (failed and completed-with-failures); active tasks
    /// are skipped, not canceled. `History` drops history records from
    /// memory entirely. Returns the number of tasks cleared.
    pub async fn clear(&self, scope: Scope) -> usize {
        match scope {
            Scope::Current => {
                let ids: Vec<u64> = {
                    let tasks = self.tasks.read().await;
                    tasks
                        .iter()
                        .filter(|t| t.is_current() && t.status.is_terminal())
                        .map(|t| t.id)
                        .collect()
                };
                let mut cleared = 0;
                for id in ids {
                    if self.soft_delete(id).await.is_ok() {
                        cleared += 1;
                    }
                }
                info!(cleared, "Cleared current view");
                cleared
            }
            Scope::History => {
                let mut tasks = self.tasks.write().await;
                let before = tasks.len();
                tasks.retain(|t| t.is_current());
                let cleared = before - tasks.len();
                info!(cleared, "Cleared history");
                cleared
            }
        }
    }

    /// Total number of tasks held, all statuses.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Check if the store holds no tasks.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn enqueue_one(store: &TaskStore, n_items: usize) -> Task {
        let payloads = (0..n_items).map(|i| json!({"n": i})).collect();
        store
            .enqueue("stub_batch", payloads, Value::Null)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_items() {
        let store = TaskStore::new();
        let err = store
            .enqueue("stub_batch", vec![], Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTask { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn enqueue_assigns_sequential_ids() {
        let store = TaskStore::new();
        let first = enqueue_one(&store, 2).await;
        let second = enqueue_one(&store, 1).await;
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.items[0].id, 1);
        assert_eq!(first.items[1].id, 2);
        assert_eq!(second.items[0].id, 3);
        assert_eq!(first.status, TaskStatus::Queued);
        assert!(first.items.iter().all(|i| i.status == ItemStatus::Queued));
    }

    #[tokio::test]
    async fn claim_flips_to_running_and_stamps() {
        let store = TaskStore::new();
        enqueue_one(&store, 1).await;

        let claimed = store.claim_next().await.unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());

        // Nothing else to claim
        assert!(store.claim_next().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_are_exclusive() {
        let store = TaskStore::new();
        enqueue_one(&store, 1).await;

        let (a, b) = tokio::join!(store.claim_next(), store.claim_next());
        assert!(a.is_some() != b.is_some(), "exactly one claimer wins");
    }

    #[tokio::test]
    async fn update_item_recomputes_progress_and_terminal_status() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 2).await;
        store.claim_next().await.unwrap();

        let [first, second] = [task.items[0].id, task.items[1].id];

        let t = store
            .update_item(task.id, first, ItemStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(t.completed_items, 0);

        let t = store
            .update_item(task.id, first, ItemStatus::Completed, Some(json!({"ok": true})))
            .await
            .unwrap();
        assert_eq!(t.completed_items, 1);
        assert_eq!(t.status, TaskStatus::Running);

        store
            .update_item(task.id, second, ItemStatus::Running, None)
            .await
            .unwrap();
        let t = store
            .update_item(task.id, second, ItemStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(t.completed_items, 2);
        assert_eq!(t.status, TaskStatus::Completed);
        assert!(t.finished_at.is_some());
        assert!(t.items[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn one_failed_item_fails_the_task() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 2).await;
        store.claim_next().await.unwrap();

        for (i, item) in task.items.iter().enumerate() {
            store
                .update_item(task.id, item.id, ItemStatus::Running, None)
                .await
                .unwrap();
            let status = if i == 0 {
                ItemStatus::Failed
            } else {
                ItemStatus::Completed
            };
            store
                .update_item(task.id, item.id, status, Some(json!({"i": i})))
                .await
                .unwrap();
        }

        let t = store.get(task.id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.completed_items, 2);
    }

    #[tokio::test]
    async fn invalid_item_transition_rejected() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 1).await;
        store.claim_next().await.unwrap();

        // Queued -> Completed skips Running
        let err = store
            .update_item(task.id, task.items[0].id, ItemStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn cancel_queued_task() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 2).await;

        let t = store.cancel(task.id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Canceled);
        assert!(t.finished_at.is_some());
        // Never claimed afterwards
        assert!(store.claim_next().await.is_none());
        // Items were never touched
        assert!(t.items.iter().all(|i| i.status == ItemStatus::Queued));
    }

    #[tokio::test]
    async fn cancel_terminal_task_is_noop() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 1).await;
        store.claim_next().await.unwrap();
        store
            .update_item(task.id, task.items[0].id, ItemStatus::Running, None)
            .await
            .unwrap();
        store
            .update_item(task.id, task.items[0].id, ItemStatus::Completed, None)
            .await
            .unwrap();

        let t = store.cancel(task.id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn canceled_task_accepts_inflight_item_finish_only() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 2).await;
        store.claim_next().await.unwrap();
        store
            .update_item(task.id, task.items[0].id, ItemStatus::Running, None)
            .await
            .unwrap();

        store.cancel(task.id).await.unwrap();

        // In-flight item may record its result
        let t = store
            .update_item(task.id, task.items[0].id, ItemStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(t.status, TaskStatus::Canceled);
        assert_eq!(t.completed_items, 1);

        // But no new item may start
        let err = store
            .update_item(task.id, task.items[1].id, ItemStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn soft_delete_requires_terminal() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 1).await;
        store.claim_next().await.unwrap();

        let err = store.soft_delete(task.id).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(
            store.task_status(task.id).await,
            Some(TaskStatus::Running)
        );

        store.cancel(task.id).await.unwrap();
        let t = store.soft_delete(task.id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Deleted);
    }

    #[tokio::test]
    async fn cancel_or_delete_picks_by_state() {
        let store = TaskStore::new();
        let active = enqueue_one(&store, 1).await;
        let done = enqueue_one(&store, 1).await;
        store.cancel(done.id).await.unwrap();

        let t = store.cancel_or_delete(active.id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Canceled);

        let t = store.cancel_or_delete(done.id).await.unwrap();
        assert_eq!(t.status, TaskStatus::Deleted);

        let err = store.cancel_or_delete(999).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound { id: 999 }));
    }

    /// Run every item of a claimed task to a terminal status; `fail_index`
    /// selects one item to fail.
    async fn run_to_end(store: &TaskStore, task: &Task, fail_index: Option<usize>) {
        for item in &task.items {
            store
                .update_item(task.id, item.id, ItemStatus::Running, None)
                .await
                .unwrap();
            let status = if fail_index == Some(item.index) {
                ItemStatus::Failed
            } else {
                ItemStatus::Completed
            };
            store
                .update_item(task.id, item.id, status, None)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn list_scopes_split_on_failed_like() {
        let store = TaskStore::new();

        // Completed with one failure: stays in the current view
        let partial = enqueue_one(&store, 2).await;
        store.claim_next().await.unwrap();
        run_to_end(&store, &partial, Some(0)).await;

        let canceled = enqueue_one(&store, 1).await;
        store.cancel(canceled.id).await.unwrap();

        let queued = enqueue_one(&store, 1).await;

        let current = store.list(Scope::Current).await;
        let history = store.list(Scope::History).await;

        let current_ids: Vec<u64> = current.iter().map(|t| t.id).collect();
        let history_ids: Vec<u64> = history.iter().map(|t| t.id).collect();
        assert_eq!(current_ids, vec![queued.id, partial.id]);
        assert_eq!(history_ids, vec![canceled.id]);

        // Newest first
        assert!(current.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn clear_current_removes_failed_like_only() {
        let store = TaskStore::new();

        let failed = enqueue_one(&store, 1).await;
        store.claim_next().await.unwrap();
        run_to_end(&store, &failed, Some(0)).await;

        let queued = enqueue_one(&store, 1).await;

        let cleared = store.clear(Scope::Current).await;
        assert_eq!(cleared, 1);
        assert_eq!(store.task_status(failed.id).await, Some(TaskStatus::Deleted));
        // The still-queued task is untouched
        assert_eq!(store.task_status(queued.id).await, Some(TaskStatus::Queued));
    }

    #[tokio::test]
    async fn clear_history_drops_records() {
        let store = TaskStore::new();
        let done = enqueue_one(&store, 1).await;
        store.cancel(done.id).await.unwrap();
        let active = enqueue_one(&store, 1).await;

        let cleared = store.clear(Scope::History).await;
        assert_eq!(cleared, 1);
        assert!(store.get(done.id).await.is_none());
        assert!(store.get(active.id).await.is_some());
    }

    #[tokio::test]
    async fn broadcast_carries_full_snapshots() {
        let store = TaskStore::new();
        let mut rx = store.subscribe();

        let task = enqueue_one(&store, 1).await;

        let msg = rx.recv().await.unwrap();
        match msg {
            TaskStreamMessage::TaskUpdate { task: t } => {
                assert_eq!(t.id, task.id);
                assert_eq!(t.status, TaskStatus::Queued);
            }
            other => panic!("Expected TaskUpdate, got {other:?}"),
        }

        store.claim_next().await.unwrap();
        let msg = rx.recv().await.unwrap();
        match msg {
            TaskStreamMessage::TaskUpdate { task: t } => {
                assert_eq!(t.status, TaskStatus::Running);
            }
            other => panic!("Expected TaskUpdate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_items_is_monotonic() {
        let store = TaskStore::new();
        let task = enqueue_one(&store, 3).await;
        store.claim_next().await.unwrap();

        let mut last = 0;
        for item in &task.items {
            let t = store
                .update_item(task.id, item.id, ItemStatus::Running, None)
                .await
                .unwrap();
            assert!(t.completed_items >= last);
            assert!(t.completed_items <= t.total_items);
            last = t.completed_items;

            let t = store
                .update_item(task.id, item.id, ItemStatus::Completed, None)
                .await
                .unwrap();
            assert!(t.completed_items >= last);
            assert!(t.completed_items <= t.total_items);
            last = t.completed_items;
        }
        assert_eq!(last, 3);
    }
}
