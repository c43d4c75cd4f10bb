//! Batch rename handler — moves one media file or folder per item.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs;

use crate::error::HandlerError;
use crate::worker::handler::OperationHandler;

/// Characters that are illegal in file names on at least one of the
/// filesystems a media library commonly lives on.
const ILLEGAL_CHARS: &str = r#"[<>:"|?*\x00-\x1f]"#;

#[derive(Debug, Deserialize)]
struct RenamePayload {
    from: String,
    to: String,
}

/// Renames one file or folder per item, payload `{from, to}`.
///
/// The destination file name is sanitized of illegal characters and the
/// destination parent directory is created if missing. Refuses to
/// overwrite an existing destination.
pub struct RenameHandler {
    illegal: Regex,
}

impl RenameHandler {
    pub fn new() -> Self {
        Self {
            illegal: Regex::new(ILLEGAL_CHARS).unwrap(),
        }
    }

    /// Replace illegal characters in the final path component.
    fn sanitize(&self, path: &Path) -> PathBuf {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => {
                let clean = self.illegal.replace_all(name, "_");
                path.with_file_name(clean.as_ref())
            }
            None => path.to_path_buf(),
        }
    }
}

impl Default for RenameHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationHandler for RenameHandler {
    fn kind(&self) -> &str {
        "rename_batch"
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, payload: &Value) -> Result<Value, HandlerError> {
        let params: RenamePayload =
            serde_json::from_value(payload.clone()).map_err(|e| HandlerError::Failed {
                reason: format!("invalid rename payload: {e}"),
            })?;

        let from = PathBuf::from(&params.from);
        let to = self.sanitize(Path::new(&params.to));

        if !fs::try_exists(&from).await.unwrap_or(false) {
            return Err(HandlerError::Failed {
                reason: format!("source does not exist: {}", from.display()),
            });
        }
        if fs::try_exists(&to).await.unwrap_or(false) {
            return Err(HandlerError::Failed {
                reason: format!("destination already exists: {}", to.display()),
            });
        }

        if let Some(parent) = to.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| HandlerError::Failed {
                    reason: format!("creating {}: {e}", parent.display()),
                })?;
        }

        fs::rename(&from, &to)
            .await
            .map_err(|e| HandlerError::Failed {
                reason: format!("renaming {}: {e}", from.display()),
            })?;

        tracing::debug!(from = %from.display(), to = %to.display(), "Renamed");
        Ok(json!({"renamed_to": to.to_string_lossy()}))
    }
}
