//! Error types for the parse server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::ValidationError;
use crate::pool::PoolError;
use crate::scratch::ScratchError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("No file provided")]
    MissingFile,

    #[error("File size ({size} bytes) exceeds maximum allowed size ({max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Unsupported file type: '{extension}'. Supported extensions: {supported}")]
    UnsupportedExtension { extension: String, supported: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid multipart body: {message}")]
    Multipart { status: StatusCode, message: String },

    #[error(transparent)]
    Backend(#[from] ValidationError),

    #[error(transparent)]
    Scratch(#[from] ScratchError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingFile
            | AppError::UnsupportedExtension { .. }
            | AppError::InvalidParameter(_)
            | AppError::Backend(_) => StatusCode::BAD_REQUEST,
            AppError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Multipart { status, .. } => *status,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Pool(PoolError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Scratch(_) | AppError::Pool(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingFile => "MISSING_FILE",
            AppError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            AppError::UnsupportedExtension { .. } => "UNSUPPORTED_FILE_TYPE",
            AppError::InvalidParameter(_) => "INVALID_PARAMETER",
            AppError::Multipart { status, .. } if *status == StatusCode::PAYLOAD_TOO_LARGE => {
                "FILE_TOO_LARGE"
            }
            AppError::Multipart { .. } => "INVALID_MULTIPART",
            AppError::Backend(ValidationError::UnknownBackend { .. }) => "UNKNOWN_BACKEND",
            AppError::Backend(ValidationError::InactiveBackend { .. }) => "INACTIVE_BACKEND",
            AppError::Backend(ValidationError::MissingServerUrl { .. }) => "MISSING_SERVER_URL",
            AppError::Scratch(_) => "RESOURCE_ERROR",
            AppError::Pool(PoolError::Engine(_)) => "ENGINE_ERROR",
            AppError::Pool(PoolError::WorkerCrashed { .. }) | AppError::Pool(PoolError::WorkerLost) => {
                "WORKER_CRASHED"
            }
            AppError::Pool(PoolError::ShuttingDown) => "SHUTTING_DOWN",
            AppError::Pool(_) => "POOL_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Diagnostic trace, when the failure carries one
    pub fn details(&self) -> Option<String> {
        match self {
            AppError::Pool(PoolError::Engine(e)) => e.details().map(String::from),
            AppError::Scratch(ScratchError::Create { source, .. }) => Some(source.to_string()),
            _ => None,
        }
    }

    pub(crate) fn into_response_with(self, request_id: Option<String>) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(request_id = request_id.as_deref(), code = self.code(), "{}", self);
        } else {
            tracing::debug!(request_id = request_id.as_deref(), code = self.code(), "{}", self);
        }

        let body = Json(ErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.code(),
            request_id,
            details: self.details(),
        });

        (status, body).into_response()
    }
}

impl From<axum::extract::multipart::MultipartRejection> for AppError {
    fn from(rejection: axum::extract::multipart::MultipartRejection) -> Self {
        AppError::Multipart {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_with(None)
    }
}

/// A failure tied to a specific parse request
#[derive(Debug)]
pub struct ParseFailure {
    pub request_id: String,
    pub error: AppError,
}

impl ParseFailure {
    pub fn new(request_id: impl Into<String>, error: impl Into<AppError>) -> Self {
        Self {
            request_id: request_id.into(),
            error: error.into(),
        }
    }
}

impl IntoResponse for ParseFailure {
    fn into_response(self) -> Response {
        self.error.into_response_with(Some(self.request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RuntimeMode;
    use crate::engine::EngineError;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::FileTooLarge { size: 2, max: 1 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::Backend(ValidationError::InactiveBackend {
                backend: "vlm-transformers".into(),
                mode: RuntimeMode::Pipeline,
                active: vec!["pipeline"],
            })
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Pool(PoolError::ShuttingDown).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_engine_details_surface() {
        let err = AppError::Pool(PoolError::Engine(
            EngineError::execution("exit 1").with_details("Traceback: ..."),
        ));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "ENGINE_ERROR");
        assert_eq!(err.details().as_deref(), Some("Traceback: ..."));
    }

    #[test]
    fn test_unknown_and_inactive_codes_differ() {
        let unknown = AppError::Backend(ValidationError::UnknownBackend {
            backend: "x".into(),
            active: vec!["pipeline"],
        });
        let inactive = AppError::Backend(ValidationError::InactiveBackend {
            backend: "vlm-transformers".into(),
            mode: RuntimeMode::Pipeline,
            active: vec!["pipeline"],
        });
        assert_ne!(unknown.code(), inactive.code());
    }
}
