//! Error types for curator.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Task queue errors — returned synchronously to the caller of the
/// corresponding store operation.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid task: {reason}")]
    InvalidTask { reason: String },

    #[error("Task {id} not found")]
    NotFound { id: u64 },

    #[error("Item {item_id} not found in task {task_id}")]
    ItemNotFound { task_id: u64, item_id: u64 },

    #[error("Task {id} is {state}, cannot transition to {target}")]
    InvalidTransition {
        id: u64,
        state: String,
        target: String,
    },
}

/// Operation handler failures — always contained at the item level and
/// recorded as the item's result, never escalated out of the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("No handler registered for task kind {kind}")]
    NotRegistered { kind: String },

    #[error("{reason}")]
    Failed { reason: String },

    #[error("Handler timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Handler panicked: {reason}")]
    Panicked { reason: String },
}

/// Live stream transport errors — contained inside the sync client via
/// reconnect and backoff, surfaced only as a connection-state change.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Stream connect failed: {reason}")]
    Connect { reason: String },

    #[error("Stream lost: {reason}")]
    Stream { reason: String },

    #[error("Snapshot fetch failed: {reason}")]
    Snapshot { reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
