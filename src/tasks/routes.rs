//! REST endpoints for the task queue.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::model::Scope;
use super::store::TaskStore;
use crate::error::TaskError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TaskStore>,
}

/// Build the Axum router with the task REST routes.
pub fn task_routes(store: Arc<TaskStore>) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(enqueue_task).get(list_tasks))
        .route("/tasks/clear", post(clear_tasks))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .with_state(state)
}

fn error_response(err: &TaskError) -> (StatusCode, Json<Value>) {
    let status = match err {
        TaskError::InvalidTask { .. } => StatusCode::BAD_REQUEST,
        TaskError::NotFound { .. } | TaskError::ItemNotFound { .. } => StatusCode::NOT_FOUND,
        TaskError::InvalidTransition { .. } => StatusCode::CONFLICT,
    };
    (status, Json(serde_json::json!({"error": err.to_string()})))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "curator"
    }))
}

// ── Tasks ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EnqueueRequest {
    #[serde(rename = "type")]
    kind: String,
    items: Vec<Value>,
    #[serde(default)]
    meta: Value,
}

async fn enqueue_task(
    State(state): State<AppState>,
    Json(body): Json<EnqueueRequest>,
) -> impl IntoResponse {
    match state.store.enqueue(body.kind, body.items, body.meta).await {
        Ok(task) => {
            info!(task_id = task.id, kind = %task.kind, "Task enqueued via REST");
            (StatusCode::CREATED, Json(serde_json::json!(task)))
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct ScopeQuery {
    #[serde(default)]
    scope: Scope,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> impl IntoResponse {
    let tasks = state.store.list(query.scope).await;
    Json(tasks)
}

async fn get_task(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    match state.store.get(id).await {
        Some(task) => (StatusCode::OK, Json(serde_json::json!(task))),
        None => error_response(&TaskError::NotFound { id }),
    }
}

/// Cancels an active task, soft-deletes a terminal one.
async fn delete_task(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    match state.store.cancel_or_delete(id).await {
        Ok(task) => {
            info!(task_id = id, status = %task.status, "Task canceled or deleted via REST");
            (StatusCode::OK, Json(serde_json::json!({"task_id": id})))
        }
        Err(e) => error_response(&e),
    }
}

async fn clear_tasks(
    State(state): State<AppState>,
    Query(query): Query<ScopeQuery>,
) -> impl IntoResponse {
    let cleared = state.store.clear(query.scope).await;
    Json(serde_json::json!({"tasks_cleared": cleared}))
}
