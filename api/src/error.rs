use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use vision_core::error::{self, ApiError};
use vision_core::{SessionError, StoreError};

/// Internal error type that converts to structured API responses
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed or missing `Mcp-Session-Id` (400)
    #[error("{0}")]
    InvalidSession(#[from] SessionError),
    /// Credential store down or timed out (503)
    #[error("{0}")]
    StoreUnavailable(#[from] StoreError),
    /// Internal error (500)
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::InvalidSession(err) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::INVALID_SESSION.to_string(),
                    message: err.to_string(),
                    field: Some("Mcp-Session-Id".to_string()),
                    request_id,
                    docs_hint: Some(
                        "Send the Mcp-Session-Id returned by initialize, or re-initialize without the header to start a new session."
                            .to_string(),
                    ),
                    retryable: false,
                },
            ),
            AppError::StoreUnavailable(err) => {
                tracing::error!(
                    event = "credential_store_unavailable",
                    request_id = %request_id,
                    error = %err,
                    "request failed on credential store"
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiError {
                        error: error::codes::STORE_UNAVAILABLE.to_string(),
                        message: "Session credentials could not be read or written. Retry later."
                            .to_string(),
                        field: None,
                        request_id,
                        docs_hint: None,
                        retryable: err.is_retryable(),
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        request_id,
                        docs_hint: None,
                        retryable: false,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}
