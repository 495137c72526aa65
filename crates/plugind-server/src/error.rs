//! HTTP error mapping.
//!
//! Every error answered by the API shares the
//! `{error_id, message, resource?, details?}` envelope, mirroring what the
//! pipelines publish on the bus for asynchronous failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use plugind_core::error::ApiError;
use plugind_core::PlugindError;

/// An API error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub body: ApiError,
}

impl ApiErrorResponse {
    pub fn new(status: StatusCode, body: ApiError) -> Self {
        Self { status, body }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ApiError {
                error_id: "unauthorized".to_string(),
                message: "Authentication error".to_string(),
                resource: None,
                details: None,
            },
        )
    }
}

impl From<PlugindError> for ApiErrorResponse {
    fn from(err: PlugindError) -> Self {
        let status = match &err {
            PlugindError::Validation { .. }
            | PlugindError::InvalidData { .. }
            | PlugindError::InvalidSortParam { .. }
            | PlugindError::UnsupportedDownloadMethod => StatusCode::BAD_REQUEST,
            PlugindError::PluginNotFound { .. } => StatusCode::NOT_FOUND,
            PlugindError::MarketUnavailable | PlugindError::NotInitialized => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PlugindError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.api_error())
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        match self.status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("server error: {}", self.body.message)
            }
            _ => tracing::debug!("client error: {}", self.body.message),
        }
        (self.status, Json(self.body)).into_response()
    }
}
