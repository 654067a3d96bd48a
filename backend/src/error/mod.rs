use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::models::quota::QuotaUsage;
use crate::types::InvalidId;

/// Message returned for every refresh failure. Reuse detection, expiry and
/// unknown credentials are indistinguishable to the caller.
pub const REAUTHENTICATE_MESSAGE: &str = "Session is no longer valid, please re-authenticate";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    InvalidIdentifier(String),
    InvalidRefreshCredential,
    QuotaExceeded(QuotaUsage),
    Validation(Vec<String>),
    StorageTimeout,
    Storage(anyhow::Error),
    InternalServerError(anyhow::Error),
}

impl AppError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageTimeout | AppError::Storage(_))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::BadRequest(msg)
            | AppError::InvalidIdentifier(msg) => write!(f, "{msg}"),
            AppError::InvalidRefreshCredential => write!(f, "invalid refresh credential"),
            AppError::QuotaExceeded(usage) => write!(
                f,
                "quota exceeded for {}: {}/{}",
                usage.resource_type.as_str(),
                usage.current_usage,
                usage.limit
            ),
            AppError::Validation(errors) => write!(f, "validation failed: {}", errors.join(", ")),
            AppError::StorageTimeout => write!(f, "storage timeout"),
            AppError::Storage(err) => write!(f, "storage error: {err}"),
            AppError::InternalServerError(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code, details) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND", None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, "UNAUTHORIZED", None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, "FORBIDDEN", None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST", None),
            AppError::InvalidIdentifier(msg) => {
                (StatusCode::BAD_REQUEST, msg, "INVALID_IDENTIFIER", None)
            }
            AppError::InvalidRefreshCredential => (
                StatusCode::UNAUTHORIZED,
                REAUTHENTICATE_MESSAGE.to_string(),
                "INVALID_REFRESH_CREDENTIAL",
                None,
            ),
            AppError::QuotaExceeded(usage) => {
                let body = json!({
                    "error": format!("Quota exceeded for {}", usage.resource_type.as_str()),
                    "code": "QUOTA_EXCEEDED",
                    "resourceType": usage.resource_type,
                    "currentUsage": usage.current_usage,
                    "limit": usage.limit,
                    "remaining": usage.remaining,
                });
                return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            }
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                "VALIDATION_ERROR",
                Some(json!({ "errors": errors })),
            ),
            AppError::StorageTimeout => {
                tracing::warn!("Storage call exceeded its deadline");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage timed out, retry later".to_string(),
                    "STORAGE_TIMEOUT",
                    Some(json!({ "retryable": true })),
                )
            }
            AppError::Storage(err) => {
                tracing::error!("Storage error: {:?}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage unavailable, retry later".to_string(),
                    "STORAGE_ERROR",
                    Some(json!({ "retryable": true })),
                )
            }
            AppError::InternalServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_SERVER_ERROR",
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            sqlx::Error::PoolTimedOut => AppError::StorageTimeout,
            _ => AppError::Storage(err.into()),
        }
    }
}

impl From<InvalidId> for AppError {
    fn from(_: InvalidId) -> Self {
        AppError::InvalidIdentifier("Workspace id must be a canonical UUID".to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::StorageTimeout
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let code = e.code.as_ref();
                    format!("{}: {}", field, code)
                })
            })
            .collect();
        AppError::Validation(messages)
    }
}
