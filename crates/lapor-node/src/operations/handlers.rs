//! HTTP surface of the operations service.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use lapor_core::auth::{Role, TokenService};
use lapor_core::bus::EventStream;
use lapor_core::domain::CaseStatus;
use lapor_core::events::{types, Event, ReportStatusUpdated, STREAM_NAME};
use lapor_core::{run_blocking, ServiceError};

use super::store::OperationsStore;
use crate::http::{
    bearer_claims_with_role, health_response, login_response, ApiError, ApiResponse, LoginRequest,
};

/// Shared state of the operations service.
#[derive(Clone)]
pub struct OperationsState {
    pub store: OperationsStore,
    pub stream: EventStream,
    pub tokens: TokenService,
    pub instance_id: String,
}

/// Builds the operations router.
pub fn router(state: OperationsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/cases/inbox", get(inbox))
        .route("/cases/{id}/status", patch(update_status))
        .with_state(state)
}

/// Request body of `PATCH /cases/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

async fn health(State(state): State<OperationsState>) -> Json<ApiResponse> {
    Json(health_response("operations", &state.instance_id))
}

async fn login(
    State(state): State<OperationsState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    Ok(Json(login_response(&state.tokens, &req)?))
}

/// `GET /cases/inbox` — the caller's agency inbox.
pub async fn inbox(
    State(state): State<OperationsState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, ApiError> {
    let claims = bearer_claims_with_role(&headers, &state.tokens, Role::Officer)?;

    let store = state.store.clone();
    let agency = claims.agency.clone();
    let rows = run_blocking(move || store.inbox(&agency)).await?;

    Ok(Json(ApiResponse::data(&serde_json::json!({
        "agency": claims.agency,
        "cases": rows,
    }))))
}

/// `PATCH /cases/{id}/status` — the officer command path.
///
/// Authorization is by agency: the case's `owner_agency` must equal the
/// caller's. The transition and its history row commit together; the
/// event publish follows the commit.
pub async fn update_status(
    State(state): State<OperationsState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    let claims = bearer_claims_with_role(&headers, &state.tokens, Role::Officer)?;
    let report_id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::Validation("invalid case id format".into()))?;
    let new_status = CaseStatus::parse(&req.status)?;

    let meta = {
        let store = state.store.clone();
        run_blocking(move || store.case_meta(report_id)).await?
    };
    let Some((owner_agency, old_status)) = meta else {
        return Err(ServiceError::NotFound("case not found".into()).into());
    };
    if owner_agency != claims.agency {
        return Err(ServiceError::Authorization(
            "you can only update cases for your agency".into(),
        )
        .into());
    }

    let changed_at = Utc::now();
    {
        let store = state.store.clone();
        let old = old_status.clone();
        let actor = claims.sub.clone();
        run_blocking(move || {
            store.transition_case(report_id, &old, new_status, &actor, changed_at)
        })
        .await?;
    }

    info!(
        report_id = %report_id,
        old_status = %old_status,
        new_status = %new_status,
        officer = %claims.sub,
        "Case status updated"
    );

    // Authoritative state already changed; a failed publish is logged and
    // left to replay tooling.
    let event = Event::new(
        types::REPORT_STATUS_UPDATED,
        report_id,
        &ReportStatusUpdated {
            report_id,
            old_status: old_status.clone(),
            new_status: new_status.as_str().to_string(),
            owner_agency,
            changed_at,
        },
    );
    match event {
        Ok(event) => {
            let stream = state.stream.clone();
            if let Err(err) =
                run_blocking(move || stream.publish(STREAM_NAME, &event).map_err(Into::into))
                    .await
            {
                warn!(report_id = %report_id, error = %err, "Status event publish failed");
            }
        }
        Err(err) => warn!(report_id = %report_id, error = %err, "Could not construct event"),
    }

    Ok((
        StatusCode::OK,
        Json(
            ApiResponse::message("Status updated successfully").with_data(serde_json::json!({
                "report_id": report_id,
                "old_status": old_status,
                "new_status": new_status.as_str(),
            })),
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> OperationsState {
        OperationsState {
            store: OperationsStore::from_connection(
                rusqlite::Connection::open_in_memory().unwrap(),
            )
            .unwrap(),
            stream: EventStream::open_in_memory().unwrap(),
            tokens: TokenService::new("test-secret").unwrap(),
            instance_id: "operations-test".into(),
        }
    }

    fn auth_headers(state: &OperationsState, user: &str) -> HeaderMap {
        let roster = lapor_core::auth::authenticate(user, "password").unwrap();
        let token = state.tokens.issue(roster).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    fn seed_case(state: &OperationsState, agency: &str) -> Uuid {
        let id = Uuid::new_v4();
        state
            .store
            .insert_case(id, agency, "Jalan rusak", "citizen1", "PUBLIC", Utc::now())
            .unwrap();
        id
    }

    #[tokio::test]
    async fn officer_updates_own_agency_case() {
        let state = state();
        let id = seed_case(&state, "AGENCY_INFRA");
        let headers = auth_headers(&state, "officer1");

        let (status, _) = update_status(
            State(state.clone()),
            headers,
            Path(id.to_string()),
            Json(UpdateStatusRequest { status: "IN_PROGRESS".into() }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);

        let (_, case_status) = state.store.case_meta(id).unwrap().unwrap();
        assert_eq!(case_status, "IN_PROGRESS");
        assert_eq!(state.store.history(id).unwrap().len(), 1);

        let events = state
            .stream
            .events_of_type(STREAM_NAME, types::REPORT_STATUS_UPDATED)
            .unwrap();
        assert_eq!(events.len(), 1);
        let payload: ReportStatusUpdated = events[0].parse_payload().unwrap();
        assert_eq!(payload.new_status, "IN_PROGRESS");
        assert_eq!(payload.owner_agency, "AGENCY_INFRA");
    }

    #[tokio::test]
    async fn cross_agency_update_is_forbidden_and_publishes_nothing() {
        let state = state();
        let id = seed_case(&state, "AGENCY_HEALTH");
        // officer1 belongs to AGENCY_INFRA.
        let headers = auth_headers(&state, "officer1");

        let err = update_status(
            State(state.clone()),
            headers,
            Path(id.to_string()),
            Json(UpdateStatusRequest { status: "IN_PROGRESS".into() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::Authorization(_)));

        let (_, case_status) = state.store.case_meta(id).unwrap().unwrap();
        assert_eq!(case_status, "RECEIVED");
        assert!(state
            .stream
            .events_of_type(STREAM_NAME, types::REPORT_STATUS_UPDATED)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_status_is_a_validation_error() {
        let state = state();
        let id = seed_case(&state, "AGENCY_INFRA");
        let headers = auth_headers(&state, "officer1");

        let err = update_status(
            State(state),
            headers,
            Path(id.to_string()),
            Json(UpdateStatusRequest { status: "DONE".into() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn missing_case_is_not_found() {
        let state = state();
        let headers = auth_headers(&state, "officer1");

        let err = update_status(
            State(state),
            headers,
            Path(Uuid::new_v4().to_string()),
            Json(UpdateStatusRequest { status: "RESOLVED".into() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn citizens_cannot_reach_the_officer_surface() {
        let state = state();
        let id = seed_case(&state, "AGENCY_INFRA");
        let headers = auth_headers(&state, "citizen1");

        let err = update_status(
            State(state.clone()),
            headers.clone(),
            Path(id.to_string()),
            Json(UpdateStatusRequest { status: "RESOLVED".into() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::Authorization(_)));

        let err = inbox(State(state), headers).await.unwrap_err();
        assert!(matches!(err.0, ServiceError::Authorization(_)));
    }
}
