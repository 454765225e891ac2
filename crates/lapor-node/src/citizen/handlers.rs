//! HTTP surface of the citizen service.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use lapor_core::auth::TokenService;
use lapor_core::bus::EventStream;
use lapor_core::domain::{Report, Visibility, DEFAULT_CATEGORY};
use lapor_core::events::{types, Event, ReportCreated, ReportUpvoted, STREAM_NAME};
use lapor_core::{run_blocking, ServiceError};

use super::store::CitizenStore;
use crate::http::{
    bearer_claims, health_response, login_response, ApiError, ApiResponse, LoginRequest,
};

/// Upper bound on the submitter's feed.
const MY_REPORTS_LIMIT: i64 = 100;
/// Upper bound on the public feed.
const PUBLIC_REPORTS_LIMIT: i64 = 50;

/// Shared state of the citizen service.
#[derive(Clone)]
pub struct CitizenState {
    pub store: CitizenStore,
    pub stream: EventStream,
    pub tokens: TokenService,
    pub instance_id: String,
}

/// Builds the citizen router.
pub fn router(state: CitizenState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/reports", post(create_report))
        .route("/reports/me", get(my_reports))
        .route("/reports/public", get(public_reports))
        .route("/reports/{id}/upvote", post(upvote_report))
        .with_state(state)
}

/// Request body of `POST /reports`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateReportRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub category: String,
}

async fn health(State(state): State<CitizenState>) -> Json<ApiResponse> {
    Json(health_response("citizen", &state.instance_id))
}

async fn login(
    State(state): State<CitizenState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    Ok(Json(login_response(&state.tokens, &req)?))
}

/// `POST /reports` — the citizen command path.
///
/// Ordering contract: authoritative insert, then best-effort inline view
/// seed, then publish. Only the first step can fail the request.
pub async fn create_report(
    State(state): State<CitizenState>,
    headers: HeaderMap,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    let claims = bearer_claims(&headers, &state.tokens)?;

    if req.content.trim().is_empty() {
        return Err(ServiceError::Validation("content is required".into()).into());
    }
    let visibility = if req.visibility.is_empty() {
        Visibility::Public
    } else {
        Visibility::parse(&req.visibility)?
    };
    let category = if req.category.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        req.category.clone()
    };

    let report = Report::new(&claims.sub, visibility, req.content.trim(), category);

    {
        let store = state.store.clone();
        let report = report.clone();
        run_blocking(move || store.insert_report(&report)).await?;
    }

    // Inline seed so the submitter's dashboard is current without waiting
    // for projector lag. Best-effort.
    {
        let store = state.store.clone();
        let seeded = report.clone();
        if let Err(err) = run_blocking(move || store.seed_views(&seeded)).await {
            warn!(report_id = %report.report_id, error = %err, "Inline view seed failed");
        }
    }

    publish_best_effort(
        &state.stream,
        Event::new(
            types::REPORT_CREATED,
            report.report_id,
            &ReportCreated {
                report_id: report.report_id,
                reporter_user_id: report.reporter_user_id.clone(),
                visibility: report.visibility.as_str().to_string(),
                content: report.content.clone(),
                category: report.category.clone(),
                created_at: report.created_at,
            },
        ),
    )
    .await;

    info!(
        report_id = %report.report_id,
        reporter = %claims.sub,
        category = %report.category,
        "Report created"
    );

    Ok((
        StatusCode::CREATED,
        Json(
            ApiResponse::message("Report created successfully")
                .with_data(serde_json::json!({ "report_id": report.report_id }))
                .with_instance(&state.instance_id),
        ),
    ))
}

/// `POST /reports/{id}/upvote`.
pub async fn upvote_report(
    State(state): State<CitizenState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    let claims = bearer_claims(&headers, &state.tokens)?;
    let report_id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::Validation("invalid report id format".into()))?;

    let visibility = {
        let store = state.store.clone();
        run_blocking(move || store.report_visibility(report_id)).await?
    };
    match visibility {
        None => return Err(ServiceError::NotFound("report not found".into()).into()),
        Some(Visibility::Anonymous) => {
            return Err(ServiceError::Policy("can only upvote public reports".into()).into())
        }
        Some(Visibility::Public) => {}
    }

    let now = Utc::now();
    {
        let store = state.store.clone();
        let voter = claims.sub.clone();
        run_blocking(move || store.record_vote(report_id, &voter, now)).await?;
    }
    {
        let store = state.store.clone();
        if let Err(err) = run_blocking(move || store.refresh_vote_counts(report_id)).await {
            warn!(report_id = %report_id, error = %err, "Vote count refresh failed");
        }
    }

    // Publication is not deduplicated at the source; consumers own dedup.
    publish_best_effort(
        &state.stream,
        Event::new(
            types::REPORT_UPVOTED,
            report_id,
            &ReportUpvoted {
                report_id,
                voter_user_id: claims.sub.clone(),
                created_at: now,
            },
        ),
    )
    .await;

    Ok(Json(ApiResponse::message("Upvoted successfully")))
}

/// `GET /reports/me`.
pub async fn my_reports(
    State(state): State<CitizenState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, ApiError> {
    let claims = bearer_claims(&headers, &state.tokens)?;
    let store = state.store.clone();
    let rows = run_blocking(move || store.my_reports(&claims.sub, MY_REPORTS_LIMIT)).await?;
    Ok(Json(ApiResponse::data(&rows)))
}

/// `GET /reports/public`.
pub async fn public_reports(
    State(state): State<CitizenState>,
) -> Result<Json<ApiResponse>, ApiError> {
    let store = state.store.clone();
    let rows = run_blocking(move || store.public_reports(PUBLIC_REPORTS_LIMIT)).await?;
    Ok(Json(ApiResponse::data(&rows)))
}

/// Publishes an event, logging instead of failing: the authoritative
/// write already committed, so the request must succeed regardless.
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
    let result = run_blocking(move || {
        stream
            .publish(STREAM_NAME, &event)
            .map_err(ServiceError::from)
    })
    .await;
    match result {
        Ok(_) => info!(event_type = %event_type, report_id = %report_id, "Published event"),
        Err(err) => {
            warn!(event_type = %event_type, report_id = %report_id, error = %err,
                  "Event publish failed");
        }
    }
}
