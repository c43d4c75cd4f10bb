//! Operation handler contract and registry.
//!
//! Handlers are the pluggable edge of the engine: one handler per task
//! kind, invoked once per item. The engine treats payloads and results as
//! opaque JSON.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::HandlerError;

/// Default per-item execution timeout.
const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// One media operation, invoked once per task item.
///
/// Implementations must be safe to call repeatedly across different items
/// without shared mutable state between calls; the pool may run the same
/// handler concurrently for items of different tasks.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Task kind this handler serves (matches `Task::kind`).
    fn kind(&self) -> &str;

    /// Upper bound for a single `execute` call.
    fn execution_timeout(&self) -> Duration {
        DEFAULT_EXECUTION_TIMEOUT
    }

    /// Perform the operation for one item payload.
    async fn execute(&self, payload: &Value) -> Result<Value, HandlerError>;
}

/// Registry of operation handlers, keyed by task kind.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn OperationHandler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under its declared kind.
    pub async fn register(&self, handler: Arc<dyn OperationHandler>) {
        let kind = handler.kind().to_string();
        self.handlers.write().await.insert(kind.clone(), handler);
        tracing::debug!("Registered handler: {}", kind);
    }

    /// Register a handler (sync version for startup wiring).
    pub fn register_sync(&self, handler: Arc<dyn OperationHandler>) {
        let kind = handler.kind().to_string();
        if let Ok(mut handlers) = self.handlers.try_write() {
            handlers.insert(kind.clone(), handler);
            tracing::debug!("Registered handler: {}", kind);
        }
    }

    /// Get the handler for a task kind.
    pub async fn get(&self, kind: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.read().await.get(kind).cloned()
    }

    /// Check if a kind has a handler.
    pub async fn has(&self, kind: &str) -> bool {
        self.handlers.read().await.contains_key(kind)
    }

    /// List all registered kinds.
    pub async fn kinds(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }

    /// Get the number of registered handlers.
    pub fn count(&self) -> usize {
        self.handlers.try_read().map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
