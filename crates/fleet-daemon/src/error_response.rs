//! Maps [`CoreError`] onto the Coordinator API's uniform error envelope
//! and its HTTP status.
//!
//! `CoreError` already derives `Serialize`, but its wire shape doesn't match
//! the envelope directly (`kind` serializes as the Rust variant name, not
//! the wire code), so handlers convert through [`ApiError`] rather than
//! returning `CoreError` to Axum directly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_model::CoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Envelope {
    error: ErrorBody,
}

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Envelope {
            error: ErrorBody {
                code: self.0.kind.code(),
                message: self.0.message,
                details: self.0.details,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
