use http::StatusCode;
use sea_orm::error::DbErr;
use serde::Serialize;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    /// Nothing matched the lookup; callers usually answer "nothing to do".
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::CacheError(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::ExternalServiceError(format!("payment gateway request failed: {}", err))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::UnknownRole(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCart(_)
            | Self::PreconditionFailed(_)
            | Self::InvalidOperation(_)
            | Self::InvalidStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::ConfigError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for end users.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::ConfigError(_)
            | Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinct_from_server_errors() {
        let err = ServiceError::NotFound("cart for customer 7".into());
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let db = ServiceError::DatabaseError(DbErr::Custom("boom".into()));
        assert!(!db.is_not_found());
        assert_eq!(db.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ServiceError::CacheError("redis at 10.0.0.3 refused".into());
        assert_eq!(err.response_message(), "Internal server error");

        let err = ServiceError::InvalidCart("supplier 3 below minimum".into());
        assert_eq!(err.response_message(), "Invalid cart: supplier 3 below minimum");
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
