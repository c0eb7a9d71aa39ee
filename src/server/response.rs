//! JSON envelope and stable error codes for the history API. Third-party
//! error payloads never pass through here; clients only ever see the code
//! and an optional terse message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCode {
    Unauthorized,
    InvalidTicker,
    InvalidWindowDays,
    InvalidLimit,
    MissingParam,
    NotFound,
    DbUnreachable,
    InternalError,
}

impl ApiCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCode::Unauthorized => "unauthorized",
            ApiCode::InvalidTicker => "invalid_ticker",
            ApiCode::InvalidWindowDays => "invalid_window_days",
            ApiCode::InvalidLimit => "invalid_limit",
            ApiCode::MissingParam => "missing_param",
            ApiCode::NotFound => "not_found",
            ApiCode::DbUnreachable => "db_unreachable",
            ApiCode::InternalError => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiCode::NotFound => StatusCode::NOT_FOUND,
            ApiCode::DbUnreachable | ApiCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub code: ApiCode,
    pub message: Option<String>,
}

impl ApiError {
    pub fn new(code: ApiCode) -> Self {
        Self { code, message: None }
    }

    pub fn with_message(code: ApiCode, message: impl Into<String>) -> Self {
        Self { code, message: Some(message.into()) }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "ok": false, "error": self.code.as_str() });
        if let Some(message) = self.message {
            body["message"] = json!(message);
        }
        (self.code.status(), Json(body)).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Auth => ApiError::new(ApiCode::Unauthorized),
            AppError::NotFound(what) => ApiError::with_message(ApiCode::NotFound, what),
            AppError::Validation(msg) => ApiError::with_message(ApiCode::MissingParam, msg),
            e @ (AppError::Storage(_) | AppError::CoordinationUnavailable(_)) => {
                // storage detail stays in the logs
                tracing::error!(error = %e, "Warehouse error serving request");
                ApiError::new(ApiCode::InternalError)
            }
            other => {
                tracing::error!(error = %other, "Unexpected error serving request");
                ApiError::new(ApiCode::InternalError)
            }
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
