use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mirror_ai::{TaskError, TurnError};
use tracing::warn;

pub const INVALID_PAYLOAD: &str = "Invalid payload";
const GENERATION_FAILED: &str = "Failed to generate a valid response. Please try again.";
const STREAM_INIT_FAILED: &str = "Failed to start assistant reply.";

/// Error answered before any response body has been committed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid payload")]
    InvalidPayload,
    /// The upstream generator or a referenced resource failed; the message is
    /// safe to show to users.
    #[error("{0}")]
    BadGateway(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidPayload => (StatusCode::BAD_REQUEST, INVALID_PAYLOAD.to_string()),
            Self::BadGateway(message) => (StatusCode::BAD_GATEWAY, message.to_string()),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Request(err) => {
                warn!(error = %err, "rejected task request");
                Self::InvalidPayload
            }
            TaskError::Generation(err) => {
                warn!(error = %err, attempts = err.attempt_count(), "structured generation failed");
                Self::BadGateway(GENERATION_FAILED)
            }
        }
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::Validation(message) => {
                warn!(%message, "rejected turn");
                Self::InvalidPayload
            }
            TurnError::StreamInit(err) => {
                warn!(error = %err, "stream init failed");
                Self::BadGateway(STREAM_INIT_FAILED)
            }
        }
    }
}
