//! Application error type.
//!
//! Every handler returns `AppResult<T>`; the `IntoResponse` impl turns an
//! `AppError` into the unified error envelope with a matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors.
#[derive(Debug, Error)]
pub enum AppError {
    /// Request parameters failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Connection string is missing or unusable.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Identifier rejected by the identifier grammar.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Issue id does not exist.
    #[error("issue not found: {0}")]
    IssueNotFound(String),

    /// The monitored server could not be reached.
    #[error("database connection failed: {0}")]
    DatabaseConnection(String),

    /// A diagnostic query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(String),

    /// Settings or issue persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An outbound call to another service failed.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::InvalidConnectionString(_) => "INVALID_CONNECTION_STRING",
            AppError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            AppError::IssueNotFound(_) => "NOT_FOUND",
            AppError::DatabaseConnection(_) => "DATABASE_CONNECTION_ERROR",
            AppError::DatabaseQuery(_) => "DATABASE_QUERY_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::InvalidConnectionString(_)
            | AppError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            AppError::IssueNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseConnection(_)
            | AppError::DatabaseQuery(_)
            | AppError::Storage(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }
        let body = ApiResponse::err(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidIdentifier("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::IssueNotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Storage("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response_status() {
        let response = AppError::IssueNotFound("abc".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
