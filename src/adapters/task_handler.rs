//! HTTP surface of a task executor
//!
//! The same routes serve the coordinator and the bundled agents, so a
//! coordinator can delegate to any of them over HTTP.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::domain::{EventStream, Task, TaskExecutor, TaskRequest};

/// Header carrying the session id of a submitted task
pub const SESSION_HEADER: &str = "x-session-id";

pub const NDJSON: &str = "application/x-ndjson";

#[derive(Clone)]
pub struct AgentState {
    pub executor: Arc<dyn TaskExecutor>,
    /// Set when the served executor is a coordinator
    pub coordinator: Option<Coordinator>,
}

impl AgentState {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor,
            coordinator: None,
        }
    }

    pub fn for_coordinator(coordinator: Coordinator) -> Self {
        Self {
            executor: Arc::new(coordinator.clone()),
            coordinator: Some(coordinator),
        }
    }
}

/// GET /.well-known/agent.json
pub async fn get_card(State(state): State<AgentState>) -> impl IntoResponse {
    Json(state.executor.card())
}

/// POST /tasks - run a task and stream its events as NDJSON
pub async fn submit_task(
    State(state): State<AgentState>,
    Json(request): Json<TaskRequest>,
) -> Response {
    let task = Task::from(request);
    let session_id = task.session_id.clone();
    tracing::info!("Accepted task for session {}", session_id);

    let (sink, events) = EventStream::channel();
    let executor = state.executor.clone();
    tokio::spawn(async move {
        executor.execute(task, sink).await;
    });

    let body = events.map(|event| {
        serde_json::to_vec(&event).map(|mut line| {
            line.push(b'\n');
            Bytes::from(line)
        })
    });

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON)
        .header(SESSION_HEADER, session_id)
        .body(Body::from_stream(body))
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to build task response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /tasks/:session_id/cancel
pub async fn cancel_task(
    State(state): State<AgentState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.executor.cancel(&session_id).await;
    let status = if cancelled {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(json!({"session_id": session_id, "cancelled": cancelled})),
    )
}

/// GET /workers
pub async fn list_workers(State(state): State<AgentState>) -> impl IntoResponse {
    match &state.coordinator {
        Some(coordinator) => {
            coordinator.refresh_cards().await;
            (StatusCode::OK, Json(json!(coordinator.describe_workers())))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "This agent does not coordinate workers"})),
        ),
    }
}
