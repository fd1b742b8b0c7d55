//! Wire error shape
//!
//! Every failure surfaces as `{error, message, request_id}`: 4xx for
//! validation and resolution, 5xx for internal faults. The request id is
//! minted per response so users can quote it in reports.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use netscout_core::Error;
use serde::Serialize;
use uuid::Uuid;

/// JSON error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
    pub request_id: Uuid,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            request_id: Uuid::new_v4(),
            status,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            match err {
                Error::Cancelled => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}
