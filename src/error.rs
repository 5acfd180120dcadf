use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::db::StoreError;

pub type AppResult<T> = Result<T, AppError>;

/// Whether 5xx responses may carry the underlying error detail.
/// Only enabled in development deployments.
static EXPOSE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

pub fn set_expose_internal_details(enabled: bool) {
    EXPOSE_INTERNAL_DETAILS.store(enabled, Ordering::Relaxed);
}

/// Application error type.
///
/// Token and credential failures are deliberately collapsed into single
/// variants so a caller cannot tell which check rejected the request.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Validation Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Content policy violation: {message}")]
    PolicyViolation {
        message: String,
        details: String,
        violations: Vec<String>,
    },

    // ===== Authentication Errors =====
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // ===== Lookup Errors =====
    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Dependency Errors =====
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Password hashing error: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    // ===== Internal Server Errors =====
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => AppError::Validation(format!("{} already exists", field)),
            StoreError::TooLong(column) => AppError::Validation(format!("{} is too long", column)),
            StoreError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
            StoreError::Backend(msg) => AppError::Internal(msg),
        }
    }
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::PolicyViolation { .. }
            | AppError::InvalidCredentials
            | AppError::InvalidToken
            | AppError::Jwt(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Hashing(_) | AppError::Internal(_) | AppError::Unknown(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a user-friendly error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::PolicyViolation { message, .. } => message.clone(),
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::InvalidToken | AppError::Jwt(_) => "Invalid or expired token".to_string(),
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::ServiceUnavailable(_) => {
                "Service temporarily unavailable. Please try again later.".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::PolicyViolation { .. } => "CONTENT_POLICY_VIOLATION",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::InvalidToken | AppError::Jwt(_) => "INVALID_TOKEN",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Hashing(_) | AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if matches!(
            self,
            AppError::InvalidCredentials | AppError::InvalidToken | AppError::Jwt(_) | AppError::Unauthorized(_)
        ) {
            tracing::warn!(
                error = %self,
                error_code = %code,
                "Authentication failed"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        let mut body = json!({
            "error": self.user_message(),
            "error_code": error_code,
            "status": status.as_u16(),
        });

        if let AppError::PolicyViolation {
            details,
            violations,
            ..
        } = &self
        {
            body["details"] = json!(details);
            body["violations"] = json!(violations);
        }

        // Server errors only carry their detail in development deployments
        if status.is_server_error() && EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) {
            body["detail"] = json!(self.to_string());
        }

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UniqueField;

    #[test]
    fn test_token_failures_are_indistinguishable() {
        let expired = AppError::InvalidToken;
        let bad_signature = AppError::Jwt(jsonwebtoken::errors::ErrorKind::InvalidSignature.into());
        assert_eq!(expired.status_code(), bad_signature.status_code());
        assert_eq!(expired.user_message(), bad_signature.user_message());
        assert_eq!(expired.error_code(), bad_signature.error_code());
    }

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let conflict: AppError = StoreError::Conflict(UniqueField::Email).into();
        assert_eq!(conflict.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(conflict.user_message(), "email already exists");

        let too_long: AppError = StoreError::TooLong("full name").into();
        assert_eq!(too_long.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(too_long.user_message(), "full name is too long");

        let down: AppError = StoreError::Unavailable("pool timed out".into()).into();
        assert_eq!(down.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let backend: AppError = StoreError::Backend("syntax error".into()).into();
        assert_eq!(backend.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(backend.user_message(), "Internal server error");
    }
}
