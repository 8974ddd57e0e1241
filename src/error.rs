//! Application error types and handling

use thiserror::Error;

/// Application error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Store unreachable or credentials rejected
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Query rejected by the store or failed in transit
    #[error("Query error: {0}")]
    QueryError(String),

    /// Malformed job specification
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::QueryError(format!("Malformed response: {}", err))
    }
}
