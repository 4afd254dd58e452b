//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use tutorix_core::{FieldViolation, TutorixError};

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Every violated input constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<FieldViolation>>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            violations: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_violations(mut self, violations: Vec<FieldViolation>) -> Self {
        self.violations = Some(violations);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    Validation(Vec<FieldViolation>),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unauthorized(String),
    Forbidden { code: &'static str, message: String },
    Gone(String),
    Internal(String),
    Database(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::Validation(violations) => (
                StatusCode::BAD_REQUEST,
                ApiError::new("VALIDATION_ERROR", "Request validation failed")
                    .with_violations(violations),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::not_found(msg)),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("CONFLICT", msg)),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ApiError::unauthorized(msg)),
            AppError::Forbidden { code, message } => {
                (StatusCode::FORBIDDEN, ApiError::new(code, message))
            }
            AppError::Gone(msg) => (StatusCode::GONE, ApiError::new("TOKEN_EXPIRED", msg)),
            AppError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::internal_error().with_details(msg),
                )
            }
            AppError::Database(msg) => {
                error!(error = %msg, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("DATABASE_ERROR", "Database operation failed").with_details(msg),
                )
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<TutorixError> for AppError {
    fn from(err: TutorixError) -> Self {
        let message = err.to_string();
        match err {
            TutorixError::Validation(violations) => AppError::Validation(violations),
            TutorixError::DuplicateEmail(_) => AppError::Conflict(message),
            TutorixError::UserNotFound | TutorixError::TokenNotFound => AppError::NotFound(message),
            TutorixError::BadCredentials => AppError::Unauthorized(message),
            TutorixError::AccountDisabled => AppError::Forbidden {
                code: "ACCOUNT_DISABLED",
                message,
            },
            TutorixError::AccountLocked => AppError::Forbidden {
                code: "ACCOUNT_LOCKED",
                message,
            },
            TutorixError::TokenExpired => AppError::Gone(message),
            TutorixError::Database(msg) => AppError::Database(msg),
            TutorixError::RoleNotInitialized(_)
            | TutorixError::Token(_)
            | TutorixError::Internal(_)
            | TutorixError::Other(_) => AppError::Internal(message),
        }
    }
}
