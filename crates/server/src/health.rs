use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use leviathan_agent::runtime::AgentRuntime;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub decision_matrix: HealthCheck,
    pub checked_at: String,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { runtime })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let decision_matrix = matrix_check(&state.runtime);
    let ready = decision_matrix.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "leviathan-server runtime initialized".to_string(),
        },
        decision_matrix,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn matrix_check(runtime: &AgentRuntime) -> HealthCheck {
    let missing = runtime.matrix().missing_intents();
    if missing.is_empty() {
        return HealthCheck { status: "ready", detail: "every intent has a route".to_string() };
    }

    let names = missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    HealthCheck { status: "degraded", detail: format!("no decision matrix row for: {names}") }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use leviathan_core::decision_matrix::DEFAULT_DECISION_MATRIX;

    use crate::health::{health, HealthState};
    use crate::test_support::{runtime_with_matrix, COMPLETE_MATRIX};

    #[tokio::test]
    async fn health_returns_ready_when_every_intent_is_routed() {
        let runtime = runtime_with_matrix(COMPLETE_MATRIX, &[]);

        let (status, Json(payload)) = health(State(HealthState { runtime })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.decision_matrix.status, "ready");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_an_intent_has_no_route() {
        let runtime = runtime_with_matrix(DEFAULT_DECISION_MATRIX, &[]);

        let (status, Json(payload)) = health(State(HealthState { runtime })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.decision_matrix.detail, "no decision matrix row for: feedback");
        assert_eq!(payload.service.status, "ready");
    }
}
