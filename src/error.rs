//! Unified error handling for greenlight.
//!
//! [`AppError`] is the closed set of outcomes a request flow can end in.
//! Store errors are classified into it once, here; the external layer
//! matches on the variant to pick a response and never inspects causes.

use crate::db::DbError;
use crate::validator::ValidationErrors;
use thiserror::Error;

/// Errors surfaced by request flows.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("the requested resource could not be found")]
    NotFound,

    /// Lost an optimistic-concurrency race; re-read and retry.
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    /// Every failed field check, including duplicate keys on creation.
    #[error("failed validation: {0}")]
    Validation(ValidationErrors),

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("your user account must be activated to access this resource")]
    InactiveAccount,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,

    /// Detail is logged where it happens; callers only see the kind.
    #[error("the server encountered a problem and could not process your request")]
    Fatal,
}

impl AppError {
    /// Single-field validation failure.
    pub fn field(field: &str, message: &str) -> Self {
        Self::Validation(ValidationErrors::single(field, message))
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::EditConflict => "edit_conflict",
            Self::Validation(_) => "validation",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InactiveAccount => "inactive_account",
            Self::NotPermitted => "not_permitted",
            Self::Fatal => "fatal",
        }
    }

    /// HTTP-style status class for the external layer.
    pub fn status_hint(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::EditConflict => 409,
            Self::Validation(_) => 422,
            Self::InvalidCredentials => 401,
            Self::InactiveAccount | Self::NotPermitted => 403,
            Self::Fatal => 500,
        }
    }

    /// Whether repeating the request after a fresh read may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EditConflict)
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => Self::NotFound,
            DbError::EditConflict => Self::EditConflict,
            DbError::DuplicateKey(field) => {
                Self::field(field, &format!("a record with this {} already exists", field))
            }
            other => {
                tracing::error!(error = %other, "Unexpected store error");
                Self::Fatal
            }
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(err: argon2::password_hash::Error) -> Self {
        tracing::error!(error = %err, "Password hashing failed");
        Self::Fatal
    }
}

/// Result type for request flows.
pub type AppResult<T> = Result<T, AppError>;
