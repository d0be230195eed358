// src/error.rs

//! Unified error handling for the crawler and loader.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler and loader operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Listing page did not have the expected table or pagination control
    #[error("Parse error: {0}")]
    Parse(String),

    /// A scan window or blob key yielded nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// A directory level was empty while walking for the latest log
    #[error("Log discovery error under '{prefix}': {message}")]
    LogDiscovery { prefix: String, message: String },

    /// No region folder matched the configured expression
    #[error("Region not found: {0}")]
    RegionNotFound(String),

    /// Upsert or transform failure while loading rows
    #[error("Store error: {0}")]
    Store(String),

    /// Another run holds the single-flight lease
    #[error("Run already in progress: {0}")]
    Locked(String),

    /// Connection-level failures survived every retry attempt
    #[error("Network error after {attempts} attempts: {message}")]
    Network { attempts: u32, message: String },

    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSV reading or writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Zip archive could not be read
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Regular expression did not compile
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a listing parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a log discovery error for the given prefix.
    pub fn log_discovery(prefix: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::LogDiscovery {
            prefix: prefix.into(),
            message: message.to_string(),
        }
    }

    /// Create a region-not-found error.
    pub fn region_not_found(message: impl Into<String>) -> Self {
        Self::RegionNotFound(message.into())
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create an S3 error.
    pub fn s3(message: impl fmt::Display) -> Self {
        Self::S3(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error means "nothing there" rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::LogDiscovery { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(AppError::not_found("x").is_not_found());
        assert!(AppError::log_discovery("local/", "empty").is_not_found());
        assert!(!AppError::parse("x").is_not_found());
        assert!(!AppError::region_not_found("서울").is_not_found());
    }

    #[test]
    fn test_log_discovery_message() {
        let err = AppError::log_discovery("local/2024/", "no entries");
        assert_eq!(
            err.to_string(),
            "Log discovery error under 'local/2024/': no entries"
        );
    }
}
