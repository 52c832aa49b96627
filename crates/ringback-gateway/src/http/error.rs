use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ringback_scheduler::SchedulerError;
use serde_json::json;
use tracing::{debug, error};

/// Error body for every API route: `{"error": <message>, "code": <CODE>}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let status = match &e {
            SchedulerError::InvalidSchedule(_) | SchedulerError::InvalidEvent(_) => {
                StatusCode::BAD_REQUEST
            }
            SchedulerError::AlreadyClaimed { .. } => StatusCode::CONFLICT,
            SchedulerError::NotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::Dispatch(_) | SchedulerError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(code = e.code(), "request failed: {e}");
        } else {
            debug!(code = e.code(), "request rejected: {e}");
        }
        Self::new(status, e.code(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": self.message, "code": self.code})),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
