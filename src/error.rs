//! Crate error taxonomy
//!
//! Every failure surfaced by the entry log or the boundary API is one of
//! these variants; the boundary maps them onto a closed set of stable codes
//! without inspecting internals.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("entry {0} not found")]
    NotFound(u64),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[source] sqlx::Error),

    #[error("storage timeout: {0}")]
    StorageTimeout(String),

    #[error("rate limited")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code for the boundary envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidOperation(_) => "INVALID_OPERATION",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::StorageTimeout(_) => "STORAGE_TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                Self::StorageTimeout("connection pool acquire timed out".to_string())
            }
            other => Self::Storage(other),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(CoreError::NotFound(7).code(), "NOT_FOUND");
        assert_eq!(
            CoreError::InvalidOperation("resolve on query entry".into()).code(),
            "INVALID_OPERATION"
        );
        assert_eq!(CoreError::RateLimited.code(), "RATE_LIMITED");
    }

    #[test]
    fn test_pool_timeout_maps_to_storage_timeout() {
        let err: CoreError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code(), "STORAGE_TIMEOUT");
    }

    #[test]
    fn test_display_includes_sequence() {
        assert_eq!(CoreError::NotFound(42).to_string(), "entry 42 not found");
    }
}
