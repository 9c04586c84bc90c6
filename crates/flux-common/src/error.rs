//! Error types for the photometry services.

use thiserror::Error;

/// Result type alias using FluxError.
pub type FluxResult<T> = Result<T, FluxError>;

/// Primary error type for catalog and store operations.
#[derive(Debug, Error)]
pub enum FluxError {
    // === Request Errors ===
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    #[error("Not authenticated")]
    Unauthenticated,

    // === Data Errors ===
    #[error("Space object not found: {0}")]
    ObjectNotFound(i64),

    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    // === Storage Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    // === Infrastructure Errors ===
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl FluxError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            FluxError::MissingParameter(_)
            | FluxError::InvalidParameter { .. }
            | FluxError::InvalidMeasurement(_) => 400,

            FluxError::Unauthenticated => 401,

            FluxError::ObjectNotFound(_) => 404,

            _ => 500,
        }
    }

    /// Shorthand for an invalid parameter error.
    pub fn invalid_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        FluxError::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for FluxError {
    fn from(err: std::io::Error) -> Self {
        FluxError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for FluxError {
    fn from(err: serde_json::Error) -> Self {
        FluxError::InternalError(format!("JSON error: {}", err))
    }
}
