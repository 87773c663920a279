//! `AppError` rendered as JSON HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::AppError;

/// `AppError` rendered as an `{ok: false, ...}` response.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            AppError::Upstream { status, body, .. } => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                json!({ "ok": false, "error": "Upstream error", "details": body }),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "ok": false, "error": msg }),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "ok": false, "error": msg }),
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "ok": false, "error": other.to_string() }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
