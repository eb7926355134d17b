//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use imcron_dcron::DcronError;
use thiserror::Error;

/// Errors surfaced by the cron service and its HTTP layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request field missing or out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Scheduler rejected or failed the operation.
    #[error(transparent)]
    Scheduler(#[from] DcronError),

    /// Message or voice gateway call failed.
    #[error("Gateway error: {0}")]
    Gateway(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(
                DcronError::DuplicateJob(_) | DcronError::InvalidCron { .. } | DcronError::Config(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Scheduler(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Gateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({"error": self.to_string()})),
        )
            .into_response()
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
