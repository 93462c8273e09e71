//! Backtest run configuration

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use mq_risk::RiskMeasure;

use crate::dates::{Frequency, HolidayCalendar};
use crate::error::BacktestResult;

/// Settings shared by every run of a [`GenericEngine`](crate::GenericEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Spacing of the simulation dates when a date range is given
    #[serde(default = "default_frequency")]
    pub frequency: Frequency,

    /// Non-business days in addition to weekends
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    /// Currency of the cash ledger
    #[serde(default = "default_cash_currency")]
    pub cash_currency: String,

    /// Measures reported per simulation date
    #[serde(default = "default_risks")]
    pub risks: Vec<RiskMeasure>,

    /// Pricing location of every calculation
    #[serde(default = "default_location")]
    pub location: String,
}

fn default_frequency() -> Frequency {
    Frequency::BusinessMonthEnd
}

fn default_cash_currency() -> String {
    "USD".to_string()
}

fn default_risks() -> Vec<RiskMeasure> {
    vec![RiskMeasure::price()]
}

fn default_location() -> String {
    "NYC".to_string()
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            holidays: Vec::new(),
            cash_currency: default_cash_currency(),
            risks: default_risks(),
            location: default_location(),
        }
    }
}

impl BacktestConfig {
    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> BacktestResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> BacktestResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> BacktestResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays = holidays.into_iter().collect();
        self
    }

    pub fn with_risks(mut self, risks: Vec<RiskMeasure>) -> Self {
        self.risks = risks;
        self
    }

    pub fn with_cash_currency(mut self, currency: impl Into<String>) -> Self {
        self.cash_currency = currency.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn calendar(&self) -> HolidayCalendar {
        HolidayCalendar::new(self.holidays.iter().copied())
    }
}
