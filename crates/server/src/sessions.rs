//! Conversation endpoints.
//!
//! Turns for one session are serialised behind a per-session lock so two
//! submissions for the same session queue instead of interleaving their
//! history writes. Different sessions run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use leviathan_agent::runtime::AgentRuntime;
use leviathan_core::domain::history::{SessionId, Turn};
use leviathan_core::errors::{GatewayError, HistoryError, PipelineError, StageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct SessionsState {
    runtime: Arc<AgentRuntime>,
    locks: Arc<Mutex<HashMap<SessionId, Arc<Mutex<()>>>>>,
}

impl SessionsState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime, locks: Arc::default() }
    }

    async fn lock_for(&self, session: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session.clone()).or_default().clone()
    }

    /// Drops the session's lock once no other turn holds or awaits it.
    async fn release(&self, session: &SessionId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session);
        }
    }

    #[cfg(test)]
    async fn tracked_sessions(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: SessionId,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: SessionId,
    pub turns: Vec<Turn>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub error: String,
    pub retryable: bool,
}

impl ErrorResponse {
    fn plain(error: impl Into<String>) -> Self {
        Self { stage: None, error: error.into(), retryable: false }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: SessionsState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}/messages", post(post_message))
        .route("/sessions/{id}/history", get(get_history))
        .with_state(state)
}

pub async fn create_session() -> (StatusCode, Json<SessionCreated>) {
    let session_id = SessionId::generate();
    info!(event_name = "session.created", session_id = %session_id, "session created");
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

pub async fn post_message(
    State(state): State<SessionsState>,
    Path(id): Path<String>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::plain("message is required"))));
    }

    let session = SessionId(id);
    let lock = state.lock_for(&session).await;
    let outcome = {
        let _turn = lock.lock().await;
        state.runtime.handle_message(&session, message).await
    };
    state.release(&session, lock).await;

    let result = outcome.map_err(pipeline_failure)?;
    let document = result.to_document().map_err(|error| {
        warn!(session_id = %session, error = %error, "result serialization failed");
        let payload = ErrorResponse::plain("result serialization failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(payload))
    })?;
    Ok(Json(Value::Object(document)))
}

pub async fn get_history(
    State(state): State<SessionsState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session = SessionId(id);
    let turns = state.runtime.history(&session).await.map_err(|error| {
        warn!(session_id = %session, error = %error, "history read failed");
        history_failure(error)
    })?;
    Ok(Json(HistoryResponse { session_id: session, turns }))
}

fn history_failure(error: HistoryError) -> ApiError {
    let cause = StageError::History(error);
    let payload =
        ErrorResponse { stage: None, error: cause.to_string(), retryable: cause.is_retryable() };
    (status_for(&cause), Json(payload))
}

fn pipeline_failure(error: PipelineError) -> ApiError {
    let payload = ErrorResponse {
        stage: Some(error.stage.as_str().to_string()),
        error: error.user_message(),
        retryable: error.retryable(),
    };
    (status_for(&error.cause), Json(payload))
}

/// 504 for timeouts, 502 for upstream model or classifier failures, 500 for
/// everything that is this service's own fault.
fn status_for(cause: &StageError) -> StatusCode {
    if cause.is_timeout() {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    match cause {
        StageError::Gateway(GatewayError::Unavailable { .. } | GatewayError::ResponseParse { .. })
        | StageError::Inference(_) => StatusCode::BAD_GATEWAY,
        StageError::Gateway(GatewayError::TemplateVariable { .. } | GatewayError::Render { .. })
        | StageError::DecisionMatrix(_)
        | StageError::History(_)
        | StageError::Timeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
