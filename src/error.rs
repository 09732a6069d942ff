//! Service error type and its HTTP mapping.
//!
//! Every handler returns `Result<_, ApiError>`; the `IntoResponse`
//! implementation produces the `{ "error": "...", "details": [...] }`
//! body with the conventional status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Validation failure (400) with per-field detail.
    #[error("Validation failed")]
    BadRequest(Vec<FieldError>),

    /// Webhook signature mismatch (401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown review id or adapter (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with the same id already exists (409).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A remote API (source platform or chat workspace) returned an error (502).
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Unclassified rendering or I/O failure (500).
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Single-field validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::BadRequest(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::BadRequest(details) => json!({
                "error": "Validation failed",
                "details": details,
            }),
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Other(_) => {
                // Detail is logged where the failure happened; the caller
                // gets a generic message.
                json!({ "error": "Internal server error" })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::validation("rating", "out of range").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("bad signature".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("no such review".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("duplicate".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Upstream("remote 500".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bad_request_carries_field_details() {
        let err = ApiError::BadRequest(vec![
            FieldError::new("rating", "must be between 1 and 5"),
            FieldError::new("reviewer_name", "required"),
        ]);
        if let ApiError::BadRequest(details) = &err {
            assert_eq!(details.len(), 2);
            assert_eq!(details[0].field, "rating");
        } else {
            panic!("expected BadRequest");
        }
    }
}
