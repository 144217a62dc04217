use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Locked(String),
    NotFound(String),
    Forbidden(String),
    RangeNotSatisfiable(String),
    Regression(String),
    NonContiguous(String),
    ClockConflict(String),
    NoPrimaryAvailable(String),
    Upstream(String),
    Internal(String),
    DatabaseError(String),
    Validation(String),
    SerializationError(String),
    ConfigurationError(String),
    TimeoutError(String),
    Unauthorized(String),
    TooManyRequests(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Locked(msg) => write!(f, "Locked: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::RangeNotSatisfiable(msg) => write!(f, "Range not satisfiable: {}", msg),
            AppError::Regression(msg) => write!(f, "Clock regression: {}", msg),
            AppError::NonContiguous(msg) => write!(f, "Non-contiguous clock range: {}", msg),
            AppError::ClockConflict(msg) => write!(f, "Clock conflict: {}", msg),
            AppError::NoPrimaryAvailable(msg) => write!(f, "No primary available: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::TimeoutError(msg) => write!(f, "Timeout error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::TooManyRequests(msg) => write!(f, "Too many requests: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Locked(msg) => (StatusCode::LOCKED, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::RangeNotSatisfiable(msg) => {
                (StatusCode::RANGE_NOT_SATISFIABLE, msg.clone())
            }
            AppError::Regression(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NonContiguous(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ClockConflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NoPrimaryAvailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Upstream(msg) => {
                tracing::warn!("upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::DatabaseError(msg) => {
                tracing::error!("database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::SerializationError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            AppError::ConfigurationError(msg) => {
                tracing::error!("configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::TimeoutError(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Upstream(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
