/// Unified error types for the Schoolhouse server
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum AppError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Malformed or out-of-range input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A required request field was absent or blank
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Email already belongs to an account
    #[error("An account with this email already exists")]
    DuplicateEmail,

    /// Generic conflict (e.g., pending invite already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invite or password token does not exist
    #[error("Invalid token")]
    InvalidToken,

    /// Invite or password token was already consumed
    #[error("Token has already been used")]
    TokenUsed,

    /// Invite or password token is past its expiry
    #[error("Token has expired")]
    TokenExpired,

    /// Registration email differs from the invited email
    #[error("Email does not match the invitation")]
    EmailMismatch,

    /// Authentication errors (bad credentials, bad session token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Webhook signature did not match the request body
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Account has been deactivated by an administrator
    #[error("Account is deactivated")]
    AccountDisabled,

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Payment reference is unknown
    #[error("Payment not found")]
    PaymentNotFound,

    /// Payment provider refused or failed to initialize a transaction
    #[error("Payment initialization failed: {0}")]
    PaymentInitFailed(String),

    /// Payment provider did not confirm the transaction
    #[error("Payment verification failed: {0}")]
    VerificationFailed(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),
}

impl AppError {
    /// Machine-readable error code returned to clients
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::MissingField(_) => "MissingField",
            AppError::DuplicateEmail => "DuplicateEmail",
            AppError::Conflict(_) => "Conflict",
            AppError::InvalidToken => "InvalidToken",
            AppError::TokenUsed => "TokenUsed",
            AppError::TokenExpired => "TokenExpired",
            AppError::EmailMismatch => "EmailMismatch",
            AppError::Authentication(_) => "AuthenticationRequired",
            AppError::InvalidSignature => "InvalidSignature",
            AppError::Authorization(_) => "Forbidden",
            AppError::AccountDisabled => "AccountDisabled",
            AppError::NotFound(_) => "NotFound",
            AppError::PaymentNotFound => "PaymentNotFound",
            AppError::PaymentInitFailed(_) => "PaymentInitFailed",
            AppError::VerificationFailed(_) => "VerificationFailed",
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Internal(_)
            | AppError::Io(_)
            | AppError::Jwt(_) => "InternalServerError",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::MissingField(_)
            | AppError::DuplicateEmail
            | AppError::Conflict(_)
            | AppError::InvalidToken
            | AppError::TokenUsed
            | AppError::TokenExpired
            | AppError::EmailMismatch
            | AppError::PaymentInitFailed(_)
            | AppError::VerificationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) | AppError::AccountDisabled => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::PaymentNotFound => StatusCode::NOT_FOUND,
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Internal(_)
            | AppError::Io(_)
            | AppError::Jwt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed with internal error");
            "Internal server error".to_string() // Don't leak details
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for server operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_are_bad_request_with_distinct_codes() {
        let errors = [AppError::InvalidToken, AppError::TokenUsed, AppError::TokenExpired];
        let codes: Vec<_> = errors.iter().map(|e| e.code()).collect();

        assert!(errors.iter().all(|e| e.status() == StatusCode::BAD_REQUEST));
        assert_eq!(codes, vec!["InvalidToken", "TokenUsed", "TokenExpired"]);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::InvalidSignature.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Authorization("nope".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::PaymentNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
