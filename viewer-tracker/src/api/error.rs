//! API error handling.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{entity_type} with id '{id}' not found"))
            }
            Error::DuplicateJob {
                broadcast_ref,
                job_id,
            } => ApiError::new(
                StatusCode::CONFLICT,
                "DUPLICATE_JOB",
                format!("{broadcast_ref} is already being tracked"),
            )
            .with_details(serde_json::json!({ "job_id": job_id })),
            Error::Validation(msg) => ApiError::validation(msg),
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::InvalidStateTransition { from, to } => {
                ApiError::conflict(format!("Cannot transition from {from} to {to}"))
            }
            Error::ActorStopped(msg) => {
                tracing::warn!("Job actor unavailable: {}", msg);
                ApiError::service_unavailable("Job is being restarted, try again")
            }
            Error::DatabaseSqlx(e) => {
                tracing::error!("Database error: {}", e);
                ApiError::internal("Database error occurred")
            }
            Error::StoreWrite(msg) => {
                tracing::error!("Store write error: {}", msg);
                ApiError::internal("Database error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_not_found() {
        let api_err: ApiError = Error::not_found("TrackingJob", "123").into();
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
        assert!(api_err.message.contains("123"));
    }

    #[test]
    fn test_duplicate_job_carries_existing_id() {
        let api_err: ApiError = Error::duplicate_job("https://example.com/live", "job-1").into();
        assert_eq!(api_err.status, StatusCode::CONFLICT);
        assert_eq!(api_err.code, "DUPLICATE_JOB");
        assert_eq!(api_err.details.unwrap()["job_id"], "job-1");
    }

    #[test]
    fn test_validation_is_unprocessable() {
        let api_err: ApiError = Error::validation("bad ref").into();
        assert_eq!(api_err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let api_err: ApiError = Error::store_write("disk I/O error").into();
        assert_eq!(api_err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_err.message.contains("disk"));
    }
}
