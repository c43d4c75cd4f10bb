//! Task data model — tasks, items, statuses, and stream message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by a worker.
    Queued,
    /// Claimed; a worker is driving its items.
    Running,
    /// Every item terminal, none failed.
    Completed,
    /// Every item terminal, at least one failed.
    Failed,
    /// Canceled before or during execution.
    Canceled,
    /// Soft-deleted; retained for history queries only.
    Deleted,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            // From Queued
            (Queued, Running) | (Queued, Canceled) |
            // From Running
            (Running, Completed) | (Running, Failed) | (Running, Canceled) |
            // Any terminal state can be soft-deleted
            (Completed, Deleted) | (Failed, Deleted) | (Canceled, Deleted)
        )
    }

    /// Check if this is a terminal status (no further transitions except
    /// soft-deletion).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled | Self::Deleted)
    }

    /// Check if the task is still active (claimable or executing).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ItemStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: ItemStatus) -> bool {
        use ItemStatus::*;

        matches!(
            (self, target),
            (Queued, Running) | (Running, Completed) | (Running, Failed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One unit of work within a task, mapped 1:1 to one operation handler
/// invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    /// Unique item ID.
    pub id: u64,
    /// Position within the task; items execute in index order.
    pub index: usize,
    /// Lifecycle status.
    pub status: ItemStatus,
    /// Opaque input for the operation handler.
    pub payload: serde_json::Value,
    /// Opaque handler output, or error detail, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// When the item started executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// One user-initiated batch operation containing an ordered list of items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique, monotonically assigned ID.
    pub id: u64,
    /// Operation class, e.g. `"rename_batch"`. Routes the task to the
    /// matching operation handler; otherwise opaque to the engine.
    #[serde(rename = "type")]
    pub kind: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Item count.
    pub total_items: usize,
    /// Items that have reached a terminal status so far.
    pub completed_items: usize,
    /// Free-form descriptive payload (target path, media type, ...).
    /// Display-only; never interpreted by the engine.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
    /// Ordered items; insertion order is execution order.
    pub items: Vec<TaskItem>,
}

impl Task {
    /// Check whether any item failed.
    pub fn has_failed_items(&self) -> bool {
        self.items.iter().any(|i| i.status == ItemStatus::Failed)
    }

    /// Failed-like projection for display and view routing: a failed task,
    /// or a completed task carrying at least one failed item ("completed
    /// with failures"). Computed at read time, never stored.
    pub fn is_failed_like(&self) -> bool {
        match self.status {
            TaskStatus::Failed => true,
            TaskStatus::Completed => self.has_failed_items(),
            _ => false,
        }
    }

    /// Whether the task belongs in the "current" view: active tasks plus
    /// failed-like ones, which stay visible until cleared. Clean
    /// completions, cancellations, and soft-deleted tasks are history.
    pub fn is_current(&self) -> bool {
        self.status.is_active() || self.is_failed_like()
    }

    /// Short display label: the meta `label` field when present, else the
    /// task kind.
    pub fn label(&self) -> &str {
        self.meta
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.kind)
    }
}

/// Which slice of the task collection a read refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Active tasks plus failed-like ones awaiting attention.
    #[default]
    Current,
    /// Clean completions, cancellations, and soft-deleted tasks.
    History,
}

/// Messages sent over the task stream (server → observer).
///
/// Every message carries complete task state — receivers never need a
/// prior delta to interpret one, which is what makes at-least-once,
/// any-order delivery tolerable. Observers must ignore unknown `type`
/// tags rather than treat them as errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskStreamMessage {
    /// Full snapshot of the current view, sent once at connection start
    /// and again whenever an observer needs re-syncing.
    Init { tasks: Vec<Task> },
    /// A single task changed; carries its complete new state.
    TaskUpdate { task: Task },
}
