//! Application error types.
//!
//! Every core operation either returns a value or one of these variants.
//! Variants carry the backend's own message where one exists.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::response::ApiResponse;

/// Result alias used across the services.
pub type AppResult<T> = Result<T, AppError>;

/// Unified error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No persisted or active connection carries this id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// The connection exists but has no live session.
    #[error("connection {0} is not active, connect first")]
    NotConnected(String),

    /// Backend type outside the supported set.
    #[error("unsupported database type: {0}")]
    UnsupportedDatabaseType(String),

    /// SSH forwarding could not be established.
    #[error("ssh tunnel error: {0}")]
    Tunnel(String),

    /// Driver failed to connect or authenticate.
    #[error("database connection failed: {0}")]
    DatabaseConnection(String),

    /// Document/search payload names a method outside the fixed set.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Query text does not have the shape the backend expects.
    #[error("malformed query payload: {0}")]
    MalformedPayload(String),

    /// Driver failed while executing a query.
    #[error("query failed: {0}")]
    DatabaseQuery(String),

    /// Request body or config failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Reading or writing the connection file failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ConnectionNotFound(_) => "NOT_FOUND",
            AppError::NotConnected(_) => "NOT_CONNECTED",
            AppError::UnsupportedDatabaseType(_) => "UNSUPPORTED_BACKEND",
            AppError::Tunnel(_) => "TUNNEL_ERROR",
            AppError::DatabaseConnection(_) => "BACKEND_CONNECT_ERROR",
            AppError::UnsupportedMethod(_) => "UNSUPPORTED_METHOD",
            AppError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            AppError::DatabaseQuery(_) => "BACKEND_EXECUTION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotConnected(_) => StatusCode::CONFLICT,
            AppError::UnsupportedDatabaseType(_)
            | AppError::UnsupportedMethod(_)
            | AppError::MalformedPayload(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Tunnel(_) | AppError::DatabaseConnection(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseQuery(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }
        (status, Json(ApiResponse::err(self.code(), self.to_string()))).into_response()
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}
