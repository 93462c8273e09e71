//! Display and result-handling configuration
//!
//! Configuration is usually loaded from YAML or JSON alongside the service
//! settings.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};

/// Options controlling tabular export of results
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DisplayOptions {
    /// Keep rows for unsupported (N/A) results in frames
    #[serde(default)]
    pub show_na: bool,
}

impl DisplayOptions {
    pub fn with_show_na(mut self, show_na: bool) -> Self {
        self.show_na = show_na;
        self
    }
}

/// Top-level result configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub display: DisplayOptions,
}

impl RiskConfig {
    /// Load from a YAML string
    ///
    /// # Example
    ///
    /// ```
    /// use mq_risk::RiskConfig;
    ///
    /// let yaml = r#"
    /// display:
    ///   show_na: true
    /// "#;
    ///
    /// let config = RiskConfig::from_yaml(yaml).unwrap();
    /// assert!(config.display.show_na);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RiskError::ConfigError(format!("Failed to parse YAML: {}", e)))
    }

    /// Load from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RiskError::ConfigError(format!("Failed to parse JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_hide_na() {
        let config = RiskConfig::from_yaml("{}").unwrap();
        assert!(!config.display.show_na);
    }

    #[test]
    fn test_json_config() {
        let config = RiskConfig::from_json(r#"{"display": {"show_na": true}}"#).unwrap();
        assert_eq!(config.display, DisplayOptions::default().with_show_na(true));
    }

    #[test]
    fn test_invalid_config() {
        let err = RiskConfig::from_yaml("display: [1, 2").unwrap_err();
        assert!(matches!(err, RiskError::ConfigError(_)));
    }
}
