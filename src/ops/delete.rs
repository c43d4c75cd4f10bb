//! Batch delete handler — removes one media file or folder per item.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs;

use crate::error::HandlerError;
use crate::worker::handler::OperationHandler;

#[derive(Debug, Deserialize)]
struct DeletePayload {
    path: String,
}

/// Deletes one file or folder per item, payload `{path}`.
#[derive(Debug, Default)]
pub struct DeleteHandler;

#[async_trait]
impl OperationHandler for DeleteHandler {
    fn kind(&self) -> &str {
        "delete_batch"
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, payload: &Value) -> Result<Value, HandlerError> {
        let params: DeletePayload =
            serde_json::from_value(payload.clone()).map_err(|e| HandlerError::Failed {
                reason: format!("invalid delete payload: {e}"),
            })?;

        let path = PathBuf::from(&params.path);
        let meta = fs::metadata(&path).await.map_err(|e| HandlerError::Failed {
            reason: format!("stat {}: {e}", path.display()),
        })?;

        let kind = if meta.is_dir() {
            fs::remove_dir_all(&path)
                .await
                .map_err(|e| HandlerError::Failed {
                    reason: format!("removing {}: {e}", path.display()),
                })?;
            "folder"
        } else {
            fs::remove_file(&path)
                .await
                .map_err(|e| HandlerError::Failed {
                    reason: format!("removing {}: {e}", path.display()),
                })?;
            "file"
        };

        tracing::debug!(path = %path.display(), kind, "Deleted");
        Ok(json!({"deleted": path.to_string_lossy(), "kind": kind}))
    }
}
