//! JSON error responses for failures that happen before a stream starts.
//!
//! ```json
//! { "error": { "code": "backend_unavailable", "message": "Server responded with status: 500" } }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docchat_relay::RelayError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

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
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", "Unauthorized")
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let message = err.message();
        match err {
            RelayError::Unauthenticated => Self::unauthenticated(),
            RelayError::Validation(_) => Self::bad_request(message),
            RelayError::BackendUnavailable {
                timed_out: true, ..
            } => Self::new(StatusCode::GATEWAY_TIMEOUT, "backend_timeout", message),
            RelayError::BackendUnavailable { .. } | RelayError::TransportInterrupted { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, "backend_unavailable", message)
            }
            RelayError::Aborted => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", message)
            }
            RelayError::Config(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
