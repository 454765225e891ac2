//! HTTP surface of the intake service.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use lapor_core::auth::{Role, TokenService};
use lapor_core::bus::EventStream;
use lapor_core::domain::{is_valid_category, CaseStatus, Visibility, VALID_CATEGORIES};
use lapor_core::events::{
    types, Event, ReportCreated, ReportDeleted, ReportUpdated, STREAM_NAME,
};
use lapor_core::{run_blocking, ServiceError};

use super::store::IntakeStore;
use crate::http::{
    bearer_claims_with_role, health_response, login_response, ApiError, ApiResponse, LoginRequest,
};

/// Shared state of the intake service.
#[derive(Clone)]
pub struct IntakeState {
    pub store: IntakeStore,
    pub stream: EventStream,
    pub tokens: TokenService,
    pub instance_id: String,
}

/// Builds the intake router.
pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/reports", post(create_report))
        .route(
            "/reports/{id}",
            axum::routing::put(update_report).delete(delete_report),
        )
        .with_state(state)
}

/// Request body of `POST /reports`.
#[derive(Debug, Deserialize)]
pub struct CreateIntakeRequest {
    pub content: String,
    pub category: String,
}

/// Request body of `PUT /reports/{id}`; absent fields are untouched.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateIntakeRequest {
    pub content: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

async fn health(State(state): State<IntakeState>) -> Json<ApiResponse> {
    Json(health_response("intake", &state.instance_id))
}

async fn login(
    State(state): State<IntakeState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    Ok(Json(login_response(&state.tokens, &req)?))
}

/// `POST /reports` — operator-entered report. Published as the same
/// `report.created` every consumer already understands.
pub async fn create_report(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    Json(req): Json<CreateIntakeRequest>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    let claims = bearer_claims_with_role(&headers, &state.tokens, Role::Officer)?;

    if req.content.trim().is_empty() {
        return Err(ServiceError::Validation("content is required".into()).into());
    }
    if !is_valid_category(&req.category) {
        return Err(ServiceError::Validation(format!(
            "invalid category; valid categories: {}",
            VALID_CATEGORIES.join(", ")
        ))
        .into());
    }

    let report_id = Uuid::new_v4();
    let created_at = Utc::now();
    let content = req.content.trim().to_string();

    {
        let store = state.store.clone();
        let content = content.clone();
        let category = req.category.clone();
        run_blocking(move || {
            store.insert(
                report_id,
                &content,
                &category,
                CaseStatus::Received.as_str(),
                created_at,
            )
        })
        .await?;
    }

    publish_best_effort(
        &state.stream,
        Event::new(
            types::REPORT_CREATED,
            report_id,
            &ReportCreated {
                report_id,
                reporter_user_id: claims.sub.clone(),
                visibility: Visibility::Public.as_str().to_string(),
                content,
                category: req.category.clone(),
                created_at,
            },
        ),
    )
    .await;

    info!(report_id = %report_id, operator = %claims.sub, "Intake report created");
    Ok((
        StatusCode::CREATED,
        Json(
            ApiResponse::message("Report created successfully")
                .with_data(serde_json::json!({ "report_id": report_id }))
                .with_instance(&state.instance_id),
        ),
    ))
}

/// `PUT /reports/{id}` — partial revision, published as `report.updated`
/// with the full resulting row.
pub async fn update_report(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateIntakeRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    bearer_claims_with_role(&headers, &state.tokens, Role::Officer)?;
    let report_id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::Validation("invalid report id format".into()))?;

    if let Some(category) = &req.category {
        if !is_valid_category(category) {
            return Err(ServiceError::Validation("invalid category".into()).into());
        }
    }
    if let Some(status) = &req.status {
        CaseStatus::parse(status)?;
    }

    let updated_at = Utc::now();
    let row = {
        let store = state.store.clone();
        run_blocking(move || {
            store.update(
                report_id,
                req.content.as_deref(),
                req.category.as_deref(),
                req.status.as_deref(),
                updated_at,
            )
        })
        .await?
    };
    let Some(row) = row else {
        return Err(ServiceError::NotFound("report not found".into()).into());
    };

    publish_best_effort(
        &state.stream,
        Event::new(
            types::REPORT_UPDATED,
            report_id,
            &ReportUpdated {
                report_id,
                content: row.content.clone(),
                category: row.category.clone(),
                status: row.status.clone(),
                updated_at,
            },
        ),
    )
    .await;

    Ok(Json(
        ApiResponse::message("Report updated successfully").with_data(serde_json::json!(row)),
    ))
}

/// `DELETE /reports/{id}` — removal, published as `report.deleted`.
pub async fn delete_report(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    bearer_claims_with_role(&headers, &state.tokens, Role::Officer)?;
    let report_id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::Validation("invalid report id format".into()))?;

    let deleted = {
        let store = state.store.clone();
        run_blocking(move || store.delete(report_id)).await?
    };
    if !deleted {
        return Err(ServiceError::NotFound("report not found".into()).into());
    }

    publish_best_effort(
        &state.stream,
        Event::new(
            types::REPORT_DELETED,
            report_id,
            &ReportDeleted {
                report_id,
                deleted_at: Utc::now(),
            },
        ),
    )
    .await;

    Ok(Json(ApiResponse::message("Report deleted successfully")))
}

async fn publish_best_effort(stream: &EventStream, event: Result<Event, ServiceError>) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "Could not construct event");
            return;
        }
    };
    let stream = stream.clone();
    let event_type = event.event_type.clone();
    let report_id = event.report_id;
    if let Err(err) = run_blocking(move || {
        stream
            .publish(STREAM_NAME, &event)
            .map_err(ServiceError::from)
    })
    .await
    {
        warn!(event_type = %event_type, report_id = %report_id, error = %err,
              "Event publish failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> IntakeState {
        IntakeState {
            store: IntakeStore::from_connection(rusqlite::Connection::open_in_memory().unwrap())
                .unwrap(),
            stream: EventStream::open_in_memory().unwrap(),
            tokens: TokenService::new("test-secret").unwrap(),
            instance_id: "intake-test".into(),
        }
    }

    fn officer_headers(state: &IntakeState) -> HeaderMap {
        let roster = lapor_core::auth::authenticate("officer1", "password").unwrap();
        let token = state.tokens.issue(roster).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    async fn seed(state: &IntakeState) -> Uuid {
        let headers = officer_headers(state);
        create_report(
            State(state.clone()),
            headers,
            Json(CreateIntakeRequest {
                content: "Laporan telepon".into(),
                category: "kebersihan".into(),
            }),
        )
        .await
        .unwrap();
        let events = state
            .stream
            .events_of_type(STREAM_NAME, types::REPORT_CREATED)
            .unwrap();
        events[0].report_id
    }

    #[tokio::test]
    async fn create_publishes_the_unified_created_event() {
        let state = state();
        let report_id = seed(&state).await;

        let events = state
            .stream
            .events_of_type(STREAM_NAME, types::REPORT_CREATED)
            .unwrap();
        let payload: ReportCreated = events[0].parse_payload().unwrap();
        assert_eq!(payload.report_id, report_id);
        assert_eq!(payload.reporter_user_id, "officer1");
        assert_eq!(payload.visibility, "PUBLIC");
    }

    #[tokio::test]
    async fn invalid_category_is_rejected() {
        let state = state();
        let headers = officer_headers(&state);
        let err = create_report(
            State(state),
            headers,
            Json(CreateIntakeRequest {
                content: "x".into(),
                category: "zzz".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn update_publishes_the_resulting_row() {
        let state = state();
        let report_id = seed(&state).await;

        update_report(
            State(state.clone()),
            officer_headers(&state),
            Path(report_id.to_string()),
            Json(UpdateIntakeRequest {
                status: Some("RESOLVED".into()),
                ..UpdateIntakeRequest::default()
            }),
        )
        .await
        .unwrap();

        let events = state
            .stream
            .events_of_type(STREAM_NAME, types::REPORT_UPDATED)
            .unwrap();
        assert_eq!(events.len(), 1);
        let payload: ReportUpdated = events[0].parse_payload().unwrap();
        assert_eq!(payload.status, "RESOLVED");
        // Untouched fields carry the stored values.
        assert_eq!(payload.content, "Laporan telepon");
    }

    #[tokio::test]
    async fn delete_of_missing_report_is_not_found() {
        let state = state();
        let err = delete_report(
            State(state.clone()),
            officer_headers(&state),
            Path(Uuid::new_v4().to_string()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::NotFound(_)));
        assert!(state
            .stream
            .events_of_type(STREAM_NAME, types::REPORT_DELETED)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn citizens_cannot_use_the_intake_surface() {
        let state = state();
        let roster = lapor_core::auth::authenticate("citizen1", "password").unwrap();
        let token = state.tokens.issue(roster).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );

        let err = create_report(
            State(state),
            headers,
            Json(CreateIntakeRequest {
                content: "x".into(),
                category: "lainnya".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.0, ServiceError::Authorization(_)));
    }
}
