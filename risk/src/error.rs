//! Error types for risk result composition and resolution

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the composition algebra, the futures layer and the
/// result containers.
///
/// Per-instrument calculation failures are *not* errors: they travel as
/// [`crate::ResultValue::Error`] data and only become a `RiskError` when an
/// aggregate numeric operation cannot proceed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    /// Two results of incompatible shapes were composed
    #[error("{lhs} and {rhs} cannot be composed")]
    CannotCompose { lhs: &'static str, rhs: &'static str },

    /// Aggregation across different units
    #[error("Cannot aggregate results with different units: {lhs} vs {rhs}")]
    UnitMismatch { lhs: String, rhs: String },

    /// Aggregation across different pricing keys
    #[error("Cannot aggregate results with different pricing keys: {0}")]
    RiskKeyMismatch(String),

    /// Heterogeneous result types in one operation
    #[error("Cannot aggregate heterogeneous types: {lhs} vs {rhs}")]
    TypeMismatch { lhs: &'static str, rhs: &'static str },

    /// An aggregate was requested over a result set containing failures
    #[error("Cannot aggregate results in error: {0}")]
    ErrorInAggregation(String),

    /// Results overlap on risk measures, instruments and dates
    #[error("Results overlap on risk measures, instruments or dates")]
    OverlappingResults,

    /// Results were produced under different scenarios or locations
    #[error("Results must have matching scenario and location")]
    IncompatibleRiskKeys,

    /// A pending future was resolved under the batch that will produce it
    #[error("Cannot evaluate results under the pricing context used to produce them")]
    ResultUnderOpenContext,

    /// Waiting for a future exceeded the caller's timeout
    #[error("Timed out after {0:?} waiting for result")]
    Timeout(Duration),

    /// A result payload carried an unknown `$type` discriminator
    #[error("Unknown result type: {0}")]
    UnknownResultType(String),

    /// A result payload did not have the expected shape
    #[error("Malformed result payload: {0}")]
    MalformedPayload(String),

    /// Lookup by measure, scenario, date, instrument or path failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RiskError {
    /// Whether this error comes from scheduling rather than from the data
    pub fn is_scheduling(&self) -> bool {
        matches!(self, RiskError::ResultUnderOpenContext | RiskError::Timeout(_))
    }
}

/// Result type for risk operations
pub type Result<T> = std::result::Result<T, RiskError>;
