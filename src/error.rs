//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.
//!
//! Only configuration-class errors and loader failures ever leave an engine
//! operation. Backend failures are reported through [`StorageError`] to the
//! event stream and degrade to a negative result instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Storage Error Enum ==
/// Failure reported by a storage adapter.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure in a file-backed adapter
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value or file contents could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored bytes are not in the shape the adapter requires
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Error raised by a remote backend client
    #[error("Backend error: {0}")]
    Backend(String),
}

// == Cache Error Enum ==
/// Unified error type for the cache engine and server.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Keys must be non-empty
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A duration string could not be parsed
    #[error("Invalid duration: '{value}'")]
    InvalidDuration { value: String },

    /// The requested storage backend is unknown or not compiled in
    #[error("Unsupported storage backend: {0}")]
    UnsupportedStorage(String),

    /// Any other configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key not found in cache (used by the HTTP layer)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Storage could not be opened while building the engine
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A `get_or_set` loader failed
    #[error(transparent)]
    Loader(#[from] anyhow::Error),

    /// The engine has been shut down
    #[error("Cache engine has been shut down")]
    ShutDown,
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidKey(_)
            | CacheError::InvalidDuration { .. }
            | CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Loader(_) => StatusCode::BAD_GATEWAY,
            CacheError::UnsupportedStorage(_)
            | CacheError::Config(_)
            | CacheError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type returned by storage adapters.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
