//! HTTP surface of the workflow service.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use lapor_core::auth::TokenService;
use lapor_core::run_blocking;
use lapor_core::sla::SlaConfig;

use super::store::WorkflowStore;
use crate::http::{
    bearer_claims, health_response, login_response, ApiError, ApiResponse, LoginRequest,
};

/// Upper bound on notification and SLA listings.
const LIST_LIMIT: i64 = 50;

/// Shared state of the workflow service.
#[derive(Clone)]
pub struct WorkflowState {
    pub store: WorkflowStore,
    pub sla: Arc<SlaConfig>,
    pub tokens: TokenService,
    pub instance_id: String,
}

/// Builds the workflow router.
pub fn router(state: WorkflowState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/notifications/me", get(my_notifications))
        .route("/sla/status", get(sla_status))
        .route("/sla/config", get(get_sla_config).post(set_sla_config))
        .with_state(state)
}

/// Request body of `POST /sla/config`.
#[derive(Debug, Deserialize)]
pub struct SetSlaConfigRequest {
    pub duration_seconds: u64,
}

async fn health(State(state): State<WorkflowState>) -> Json<ApiResponse> {
    Json(health_response("workflow", &state.instance_id))
}

async fn login(
    State(state): State<WorkflowState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    Ok(Json(login_response(&state.tokens, &req)?))
}

/// `GET /notifications/me`.
pub async fn my_notifications(
    State(state): State<WorkflowState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, ApiError> {
    let claims = bearer_claims(&headers, &state.tokens)?;
    let store = state.store.clone();
    let rows = run_blocking(move || store.notifications_for(&claims.sub, LIST_LIMIT)).await?;
    Ok(Json(ApiResponse::data(&rows)))
}

/// `GET /sla/status` — every job joined with its projection.
pub async fn sla_status(
    State(state): State<WorkflowState>,
) -> Result<Json<ApiResponse>, ApiError> {
    let store = state.store.clone();
    let rows = run_blocking(move || store.sla_status(Utc::now(), LIST_LIMIT)).await?;
    Ok(Json(ApiResponse::data(&rows)))
}

/// `GET /sla/config`.
pub async fn get_sla_config(
    State(state): State<WorkflowState>,
) -> Result<Json<ApiResponse>, ApiError> {
    let duration = state.sla.get();
    Ok(Json(ApiResponse::data(&serde_json::json!({
        "sla_duration_sec": duration.as_secs(),
    }))))
}

/// `POST /sla/config` — runtime SLA adjustment, floor 10 seconds.
pub async fn set_sla_config(
    State(state): State<WorkflowState>,
    Json(req): Json<SetSlaConfigRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let duration = Duration::from_secs(req.duration_seconds);
    state.sla.set(duration)?;
    Ok(Json(
        ApiResponse::message("SLA duration updated").with_data(serde_json::json!({
            "sla_duration_sec": req.duration_seconds,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapor_core::ServiceError;

    fn state() -> WorkflowState {
        WorkflowState {
            store: WorkflowStore::from_connection(
                rusqlite::Connection::open_in_memory().unwrap(),
            )
            .unwrap(),
            sla: Arc::new(SlaConfig::default()),
            tokens: TokenService::new("test-secret").unwrap(),
            instance_id: "workflow-test".into(),
        }
    }

    #[tokio::test]
    async fn sla_config_round_trips_through_the_admin_surface() {
        let state = state();
        set_sla_config(
            State(state.clone()),
            Json(SetSlaConfigRequest { duration_seconds: 45 }),
        )
        .await
        .unwrap();
        assert_eq!(state.sla.get(), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn sla_below_the_floor_is_rejected() {
        let state = state();
        let err = set_sla_config(
            State(state.clone()),
            Json(SetSlaConfigRequest { duration_seconds: 9 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::Validation(_)));
        assert_eq!(state.sla.get(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn notifications_require_a_token() {
        let state = state();
        let err = my_notifications(State(state), HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err.0, ServiceError::Authentication(_)));
    }
}
