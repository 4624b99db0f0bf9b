//! Error types for the cache layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache layer.
///
/// Variants carry plain strings so the error is `Clone`: a deduplicated load
/// hands the same error to every joined caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key not found in either tier
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key is empty or too long
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backing store read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Remote side reported a temporary failure (5xx-equivalent)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Loader failed for a reason that is not worth retrying
    #[error("Loader error: {0}")]
    Loader(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Persistence(err.to_string())
    }
}

// == Retryable ==
/// Classifies errors as transient (worth retrying) or permanent.
///
/// The default retry predicate only retries errors reporting `true` here.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CacheError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Timeout(_)
                | CacheError::Network(_)
                | CacheError::Unavailable(_)
                | CacheError::Persistence(_)
        )
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidKey(_) | CacheError::Serialization(_) => StatusCode::BAD_REQUEST,
            CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Network(_) | CacheError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Persistence(_) | CacheError::Loader(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache layer.
pub type Result<T> = std::result::Result<T, CacheError>;
