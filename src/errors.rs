use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Machine-readable error code (e.g., "insufficient_available")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Whether the caller may retry the same request
    pub retryable: bool,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Insufficient available quantity for {chain_key}: available {available}, requested {requested}")]
    InsufficientAvailable {
        chain_key: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Invalid chain key: {0}")]
    InvalidChainKey(String),

    #[error("Invalid movement type: {0}")]
    InvalidMovementType(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Nothing to unreserve for reservation {0}")]
    NothingToUnreserve(Uuid),

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    pub fn insufficient(chain_key: impl Into<String>, available: Decimal, requested: Decimal) -> Self {
        ServiceError::InsufficientAvailable {
            chain_key: chain_key.into(),
            available,
            requested,
        }
    }

    /// Reclassifies database errors that report row-lock contention (a
    /// `lock_timeout` expiry or a deadlock victim) as `LockTimeout`.
    pub fn classify_contention(self) -> Self {
        match self {
            Self::DatabaseError(err) if is_lock_contention(&err) => {
                Self::LockTimeout(err.to_string())
            }
            other => other,
        }
    }

    /// Transient failures that are safe to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }

    /// Short machine-readable code for logs, metrics labels and responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::InsufficientAvailable { .. } => "insufficient_available",
            Self::InvalidChainKey(_) => "invalid_chain_key",
            Self::InvalidMovementType(_) => "invalid_movement_type",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::NothingToUnreserve(_) => "nothing_to_unreserve",
            Self::LockTimeout(_) => "lock_timeout",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InternalError(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) | Self::InvalidChainKey(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidMovementType(_) | Self::InvalidQuantity(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientAvailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NothingToUnreserve(_) => StatusCode::CONFLICT,
            Self::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Postgres reports these as SQLSTATE 55P03 and 40P01.
fn is_lock_contention(err: &DbErr) -> bool {
    let message = err.to_string().to_lowercase();
    ["lock timeout", "deadlock detected", "55p03", "40p01"]
        .iter()
        .any(|needle| message.contains(needle))
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            retryable: self.is_retryable(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
