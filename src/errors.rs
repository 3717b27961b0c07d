use crate::services::{backend::BackendError, error::RepositoryError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

fn backend_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::ContainerNotFound(_) | BackendError::BlobNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        BackendError::InvalidContainerName { .. }
        | BackendError::InvalidKey(_)
        | BackendError::UnsupportedSource(_) => StatusCode::BAD_REQUEST,
        BackendError::Unauthorized(_) => StatusCode::FORBIDDEN,
        BackendError::CorruptMetadata { .. } | BackendError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        BackendError::Sqlx(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        let status = match &err {
            RepositoryError::BackendUnavailable { source, .. }
            | RepositoryError::ContainerCreationFailed { source, .. } => backend_status(source),
            RepositoryError::SourceNotFound(_) => StatusCode::NOT_FOUND,
            RepositoryError::NoActiveContainer
            | RepositoryError::InvalidUri(_)
            | RepositoryError::InvalidSasConfiguration(_)
            | RepositoryError::Archive(_) => StatusCode::BAD_REQUEST,
            RepositoryError::CopyFailed { .. } => StatusCode::BAD_GATEWAY,
            // Matches nginx's "client closed request".
            RepositoryError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            RepositoryError::Configuration(_)
            | RepositoryError::Io(_)
            | RepositoryError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
