//! Error types for the backtest engine

use chrono::NaiveDate;
use thiserror::Error;

use mq_exec::ExecError;
use mq_risk::RiskError;

/// Main error type for backtest operations
#[derive(Error, Debug)]
pub enum BacktestError {
    /// Pricing context or risk service error
    #[error("Pricing error: {0}")]
    Exec(#[from] ExecError),

    /// Result composition error
    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    /// Relative date rule or frequency could not be parsed
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Strategy uses something the engine cannot run
    #[error("Unsupported strategy: {0}")]
    UnsupportedStrategy(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Trade duration could not be turned into a date
    #[error("Cannot determine final date of {trade}: {reason}")]
    FinalDate {
        trade: String,
        reason: String,
    },

    /// No simulation dates
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BacktestError {
    pub fn final_date(trade: &str, reason: impl Into<String>) -> Self {
        BacktestError::FinalDate {
            trade: trade.to_string(),
            reason: reason.into(),
        }
    }

    pub fn no_states(start: NaiveDate, end: NaiveDate) -> Self {
        BacktestError::InsufficientData(format!("no simulation dates between {} and {}", start, end))
    }

    /// Whether the error came from parsing a rule, frequency or duration
    pub fn is_rule_error(&self) -> bool {
        matches!(self, BacktestError::InvalidRule(_) | BacktestError::FinalDate { .. })
    }
}

/// Result type for backtest operations
pub type BacktestResult<T> = Result<T, BacktestError>;
