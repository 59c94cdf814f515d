use crate::error::AssistantError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::any::Any;
use thiserror::Error;
use tracing::error;

const INTERNAL_DETAIL: &str = "Internal server error";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid or missing API key")]
    Unauthorized,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error(transparent)]
    Internal(#[from] AssistantError),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

fn detail_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(ErrorBody { detail: detail.into() })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(reason) => detail_response(StatusCode::BAD_REQUEST, reason),
            ApiError::Unauthorized => detail_response(StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::RateLimited => detail_response(StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ApiError::Internal(e) => {
                error!("Unhandled error: {}", e);
                detail_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_DETAIL)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Response for a handler that panicked.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", message);
    detail_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_DETAIL)
}
