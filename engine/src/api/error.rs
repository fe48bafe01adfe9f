use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{ConfigurationError, VerifyError};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Configuration(ConfigurationError),
    Validation(String),
    NotFound(String),
    Unauthorized(String),
    Conflict(String),
    Internal(String),
    ServiceUnavailable,
}

impl From<ConfigurationError> for ApiError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

impl From<VerifyError> for ApiError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::Duplicate(_) => Self::Conflict(e.to_string()),
            VerifyError::Store(_) => Self::ServiceUnavailable,
            _ => Self::Unauthorized(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "api_internal_error");
        Self::Internal("storage error".into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Configuration(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            Self::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "service unavailable".into()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
