//! Error types for the pricing context and risk service clients

use thiserror::Error;

use mq_risk::RiskError;

/// Result type for pricing operations
pub type ExecResult<T> = Result<T, ExecError>;

/// Pricing context and service error types
#[derive(Debug, Error)]
pub enum ExecError {
    /// Result composition or container error
    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    /// Rate limit exceeded
    #[error("Rate limit exceeded for provider {provider}: {message}")]
    RateLimitExceeded {
        /// Provider identifier
        provider: String,
        /// Error message
        message: String,
    },

    /// Risk service returned an error
    #[error("Service error from {provider}: {message}")]
    ServiceError {
        /// Provider identifier
        provider: String,
        /// Error message
        message: String,
        /// Optional HTTP status code
        code: Option<String>,
    },

    /// Report id unknown to the service
    #[error("Report not found: {0}")]
    ReportNotFound(String),

    /// No service registered for a provider
    #[error("Provider not supported: {0}")]
    ProviderNotSupported(String),

    /// API authentication error
    #[error("API authentication failed: {0}")]
    AuthenticationError(String),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Pricing context used out of order
    #[error("Invalid context state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// URL parsing error
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl ExecError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Timeout(_) | ExecError::RateLimitExceeded { .. } | ExecError::HttpError(_)
        )
    }

    /// Check if error is due to rate limiting
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ExecError::RateLimitExceeded { .. })
    }
}
