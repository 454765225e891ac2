//! HTTP surface of the query service.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use lapor_core::{run_blocking, ServiceError};

use super::store::{QueryStore, ReportFilter};
use crate::http::{health_response, ApiError, ApiResponse, Meta};

/// Default page size.
const DEFAULT_PER_PAGE: i64 = 20;
/// Largest accepted page size.
const MAX_PER_PAGE: i64 = 100;

/// Shared state of the query service.
#[derive(Clone)]
pub struct QueryState {
    pub store: QueryStore,
    pub instance_id: String,
}

/// Builds the query router.
pub fn router(state: QueryState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reports", get(list_reports))
        .route("/reports/{id}", get(report_by_id))
        .route("/statistics", get(statistics))
        .with_state(state)
}

/// Query parameters of `GET /reports`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub category: Option<String>,
    pub status: Option<String>,
}

/// Clamped pagination: page below 1 falls back to 1, per-page below 1
/// falls back to the default, per-page above the cap is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    #[must_use]
    pub fn from_params(page: Option<i64>, per_page: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p >= 1 => p,
            _ => 1,
        };
        let per_page = match per_page {
            Some(p) if p >= 1 => p.min(MAX_PER_PAGE),
            _ => DEFAULT_PER_PAGE,
        };
        Self { page, per_page }
    }

    #[must_use]
    pub const fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

async fn health(State(state): State<QueryState>) -> Json<ApiResponse> {
    Json(health_response("query", &state.instance_id))
}

/// `GET /reports` — paginated, filterable master list.
pub async fn list_reports(
    State(state): State<QueryState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse>, ApiError> {
    let paging = Pagination::from_params(params.page, params.per_page);
    let filter = ReportFilter {
        category: params.category.filter(|c| !c.is_empty()),
        status: params.status.filter(|s| !s.is_empty()),
        limit: paging.per_page,
        offset: paging.offset(),
    };

    let store = state.store.clone();
    let (rows, total) = run_blocking(move || store.list_reports(&filter)).await?;

    Ok(Json(
        ApiResponse::data(&rows)
            .with_instance(&state.instance_id)
            .with_meta(Meta {
                total,
                page: paging.page,
                per_page: paging.per_page,
            }),
    ))
}

/// `GET /reports/{id}` — id format is validated before touching storage.
pub async fn report_by_id(
    State(state): State<QueryState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::Validation("invalid report ID format".into()))?;

    let store = state.store.clone();
    let row = run_blocking(move || store.report_by_id(id)).await?;
    match row {
        Some(row) => Ok(Json(
            ApiResponse::data(&row).with_instance(&state.instance_id),
        )),
        None => Err(ServiceError::NotFound("report not found".into()).into()),
    }
}

/// Query parameters of `GET /statistics`.
#[derive(Debug, Default, Deserialize)]
pub struct StatisticsParams {
    pub category: Option<String>,
}

/// `GET /statistics` — per-category counts per status plus totals.
pub async fn statistics(
    State(state): State<QueryState>,
    Query(params): Query<StatisticsParams>,
) -> Result<Json<ApiResponse>, ApiError> {
    let store = state.store.clone();
    let category = params.category.filter(|c| !c.is_empty());
    let stats =
        run_blocking(move || store.statistics(category.as_deref())).await?;
    Ok(Json(
        ApiResponse::data(&stats).with_instance(&state.instance_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_page_above_the_cap_is_clamped() {
        assert_eq!(
            Pagination::from_params(Some(1), Some(500)),
            Pagination { page: 1, per_page: 100 }
        );
    }

    #[test]
    fn per_page_below_one_falls_back_to_default() {
        assert_eq!(
            Pagination::from_params(Some(1), Some(0)),
            Pagination { page: 1, per_page: 20 }
        );
        assert_eq!(
            Pagination::from_params(Some(1), Some(-3)),
            Pagination { page: 1, per_page: 20 }
        );
    }

    #[test]
    fn page_below_one_falls_back_to_one() {
        assert_eq!(
            Pagination::from_params(Some(0), None),
            Pagination { page: 1, per_page: 20 }
        );
        assert_eq!(Pagination::from_params(Some(3), Some(25)).offset(), 50);
    }

    #[tokio::test]
    async fn bad_id_format_is_rejected_before_storage() {
        let state = QueryState {
            store: QueryStore::from_connections(vec![
                rusqlite::Connection::open_in_memory().unwrap(),
            ])
            .unwrap(),
            instance_id: "query-test".into(),
        };

        let err = report_by_id(State(state), Path("not-a-uuid".into()))
            .await
            .unwrap_err();
        assert!(matches!(err.0, ServiceError::Validation(_)));
    }
}
