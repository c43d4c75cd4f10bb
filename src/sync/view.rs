//! Client-side reconciled view of the task collection.
//!
//! Built to digest an at-least-once, any-order stream: every incoming
//! message carries complete task state, so the merge is remove-by-id,
//! insert, resort — replaying a message or receiving two tasks'
//! updates interleaved converges to the same view.

use crate::tasks::model::Task;

/// A single consistent task collection assembled from snapshots and
/// incremental updates.
#[derive(Debug, Default)]
pub struct TaskView {
    tasks: Vec<Task>,
}

impl TaskView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view with a fresh snapshot.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        self.sort();
    }

    /// Apply one incremental update carrying the task's complete state.
    /// Idempotent and order-safe: last write wins per id.
    pub fn apply(&mut self, task: Task) {
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.push(task);
        self.sort();
    }

    /// Newest first; id breaks created-at ties (ids are monotonic).
    fn sort(&mut self) {
        self.tasks
            .sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    }

    /// All tasks in display order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Look up one task by id.
    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Active and failed-like tasks, the same projection the server's
    /// current view uses.
    pub fn current(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.is_current()).collect()
    }

    /// Everything else: clean completions, cancellations, deletions.
    pub fn history(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| !t.is_current()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
