use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// ErrorKind
///
/// The stable, client-visible classification of every failure the admin API can return.
/// Each kind owns exactly one wire code and one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCredentials,
    Unauthenticated,
    Forbidden,
    ValidationError,
    NotFound,
    Conflict,
    TransactionError,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::TransactionError => "TRANSACTION_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::TransactionError | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// AppError
///
/// Unified error type for every handler and component. Handlers return
/// `Result<_, AppError>` and the `IntoResponse` impl renders the stable code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthenticated,

    #[error("insufficient privileges")]
    Forbidden,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A cascade step failed and the whole transaction was rolled back.
    #[error("transaction rolled back at step '{step}': {message}")]
    Transaction { step: &'static str, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transaction { .. } => ErrorKind::TransactionError,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable wire code, e.g. `TRANSACTION_ERROR`.
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// The message sent to the client. Internal details and database
    /// messages stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Transaction { step, .. } => {
                format!("operation rolled back at step '{step}'")
            }
            Self::Conflict(_) => "resource already exists".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind == ErrorKind::Internal || kind == ErrorKind::TransactionError {
            tracing::error!(code = kind.code(), error = %self, "request failed");
        }
        let body = ErrorBody {
            code: kind.code(),
            message: self.public_message(),
        };
        (kind.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("record".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(db.message().to_string())
            }
            // A child row still references the target.
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                AppError::Conflict(db.message().to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}

/// Result alias used across the crate.
pub type AppResult<T> = std::result::Result<T, AppError>;
