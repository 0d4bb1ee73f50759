use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Unified application error, mapped to an HTTP status by `IntoResponse`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("catalog contains no usable tracks")]
    CatalogEmpty,

    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("unknown track: {0}")]
    UnknownTrack(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CatalogEmpty => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UnknownTrack(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
