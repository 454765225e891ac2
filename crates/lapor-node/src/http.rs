//! Shared HTTP plumbing: the response envelope, error mapping, and bearer
//! token extraction.
//!
//! Every service answers with the same JSON envelope, success or failure:
//! `{success, message?, data?, error?, instance?, meta?}`. Domain errors
//! map onto statuses here so handlers can use `?` throughout.

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use lapor_core::auth::{Claims, Role, TokenService};
use lapor_core::ServiceError;

/// Pagination metadata on list responses.
#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// The uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl ApiResponse {
    /// Success with a data payload.
    #[must_use]
    pub fn data<T: Serialize>(data: &T) -> Self {
        Self {
            success: true,
            message: None,
            data: serde_json::to_value(data).ok(),
            error: None,
            instance: None,
            meta: None,
        }
    }

    /// Success with just a message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
            instance: None,
            meta: None,
        }
    }

    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Handler-side error that knows its HTTP status.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            ServiceError::Validation(_) | ServiceError::Policy(_) => StatusCode::BAD_REQUEST,
            ServiceError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Authorization(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The user-facing message: the inner description without the error
    /// class prefix.
    fn message(&self) -> String {
        match &self.0 {
            ServiceError::Validation(m)
            | ServiceError::Authentication(m)
            | ServiceError::Authorization(m)
            | ServiceError::NotFound(m)
            | ServiceError::Policy(m)
            | ServiceError::Conflict(m) => m.clone(),
            // Internal detail stays in the logs.
            ServiceError::Transport(_) | ServiceError::Projection(_) => {
                "internal error".to_string()
            }
            _ => self.0.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ApiResponse {
            success: false,
            message: None,
            data: None,
            error: Some(self.message()),
            instance: None,
            meta: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Extracts and verifies the bearer token from the request headers.
///
/// # Errors
///
/// Returns `ServiceError::Authentication` when the header is absent,
/// malformed, or the token does not verify.
pub fn bearer_claims(headers: &HeaderMap, tokens: &TokenService) -> Result<Claims, ServiceError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Authentication("missing authorization token".into()))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or_else(|| ServiceError::Authentication("malformed authorization header".into()))?;

    tokens.verify(token)
}

/// Like [`bearer_claims`], but additionally requires `role`.
///
/// # Errors
///
/// Returns `ServiceError::Authorization` when the caller holds a token of
/// the wrong role.
pub fn bearer_claims_with_role(
    headers: &HeaderMap,
    tokens: &TokenService,
    role: Role,
) -> Result<Claims, ServiceError> {
    let claims = bearer_claims(headers, tokens)?;
    if claims.role != role {
        return Err(ServiceError::Authorization(format!(
            "only {} accounts can access this service",
            role.as_str()
        )));
    }
    Ok(claims)
}

/// Login request body shared by all services.
#[derive(Debug, serde::Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Runs the demo-roster login flow and answers with a token.
///
/// # Errors
///
/// Returns `ServiceError::Authentication` for bad credentials.
pub fn login_response(
    tokens: &TokenService,
    req: &LoginRequest,
) -> Result<ApiResponse, ServiceError> {
    let user = lapor_core::auth::authenticate(&req.username, &req.password)?;
    let token = tokens.issue(user)?;
    Ok(ApiResponse::message("login successful").with_data(serde_json::json!({
        "token": token,
        "user": {
            "id": user.id,
            "role": user.role.as_str(),
            "agency": user.agency,
        },
    })))
}

/// Health payload served by every service.
#[must_use]
pub fn health_response(service: &str, instance: &str) -> ApiResponse {
    ApiResponse::message("healthy").with_data(serde_json::json!({
        "status": "healthy",
        "service": service,
        "instance": instance,
    }))
}
