//! Risk service configuration
//!
//! Configuration is read from YAML/JSON or from `MARQUEE_*` environment
//! variables (a `.env` file is honoured):
//!
//! | Variable                  | Field             |
//! |---------------------------|-------------------|
//! | `MARQUEE_PROVIDER`        | `provider`        |
//! | `MARQUEE_API_ENDPOINT`    | `api_endpoint`    |
//! | `MARQUEE_AUTH_ENDPOINT`   | `auth_endpoint`   |
//! | `MARQUEE_CLIENT_ID`       | `client_id`       |
//! | `MARQUEE_CLIENT_SECRET`   | `client_secret`   |
//! | `MARQUEE_POLL_INTERVAL_MS`| `poll_interval_ms`|
//! | `MARQUEE_TIMEOUT_SECS`    | `timeout_secs`    |
//! | `MARQUEE_LOCATION`        | `defaults.location` |

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{ExecError, ExecResult};
use crate::ratelimit::RateLimiterConfig;

/// Default pricing settings applied to requests that do not override them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingDefaults {
    /// Pricing location
    #[serde(default = "default_location")]
    pub location: String,

    /// "close" or "live"
    #[serde(default = "default_market_type")]
    pub market_type: String,

    /// CSA term passed as a request parameter
    #[serde(default)]
    pub csa_term: Option<String>,
}

fn default_location() -> String {
    "NYC".to_string()
}

fn default_market_type() -> String {
    "close".to_string()
}

impl Default for PricingDefaults {
    fn default() -> Self {
        Self {
            location: default_location(),
            market_type: default_market_type(),
            csa_term: None,
        }
    }
}

/// Risk service connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Provider identifier carried in every risk key
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API endpoint URL
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// OAuth token endpoint URL
    #[serde(default)]
    pub auth_endpoint: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// Delay between polls of a pending report
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Overall limit for one calculation, unbounded when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub rate_limit: RateLimiterConfig,

    #[serde(default)]
    pub defaults: PricingDefaults,
}

fn default_provider() -> String {
    "marquee".to_string()
}

fn default_api_endpoint() -> String {
    "https://api.marquee.gs.com/v1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_endpoint: default_api_endpoint(),
            auth_endpoint: None,
            client_id: None,
            client_secret: None,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
            rate_limit: RateLimiterConfig::default(),
            defaults: PricingDefaults::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a configuration for an endpoint
    pub fn new(provider: impl Into<String>, api_endpoint: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_endpoint: api_endpoint.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> ExecResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> ExecResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `MARQUEE_*` environment variables
    pub fn from_env() -> ExecResult<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Ok(provider) = env::var("MARQUEE_PROVIDER") {
            config.provider = provider;
        }
        if let Ok(endpoint) = env::var("MARQUEE_API_ENDPOINT") {
            config.api_endpoint = endpoint;
        }
        config.auth_endpoint = env::var("MARQUEE_AUTH_ENDPOINT").ok();
        config.client_id = env::var("MARQUEE_CLIENT_ID").ok();
        config.client_secret = env::var("MARQUEE_CLIENT_SECRET").ok();
        if let Ok(ms) = env::var("MARQUEE_POLL_INTERVAL_MS") {
            config.poll_interval_ms = ms
                .parse()
                .map_err(|_| ExecError::ConfigError(format!("Invalid MARQUEE_POLL_INTERVAL_MS: {}", ms)))?;
        }
        if let Ok(secs) = env::var("MARQUEE_TIMEOUT_SECS") {
            config.timeout_secs = Some(
                secs.parse()
                    .map_err(|_| ExecError::ConfigError(format!("Invalid MARQUEE_TIMEOUT_SECS: {}", secs)))?,
            );
        }
        if let Ok(location) = env::var("MARQUEE_LOCATION") {
            config.defaults.location = location;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set client credentials
    pub fn with_credentials(mut self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the overall calculation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Set the rate limit
    pub fn with_rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the default pricing location
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.defaults.location = location.into();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> ExecResult<()> {
        url::Url::parse(&self.api_endpoint)?;
        if self.rate_limit.requests_per_second == 0 || self.rate_limit.burst_size == 0 {
            return Err(ExecError::ConfigError(
                "rate limit must allow at least one request".to_string(),
            ));
        }
        match self.defaults.market_type.as_str() {
            "close" | "live" => Ok(()),
            other => Err(ExecError::ConfigError(format!("Unknown market type: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.provider, "marquee");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.timeout().is_none());
        assert_eq!(config.defaults.location, "NYC");
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
provider: marquee
api_endpoint: https://api.example.com/v1
poll_interval_ms: 250
timeout_secs: 30
rate_limit:
  requests_per_second: 5
  burst_size: 10
defaults:
  location: LDN
  csa_term: EUR-OIS
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.rate_limit.requests_per_second, 5);
        assert_eq!(config.defaults.location, "LDN");
        assert_eq!(config.defaults.market_type, "close");
        assert_eq!(config.defaults.csa_term.as_deref(), Some("EUR-OIS"));
    }

    #[test]
    fn test_config_rejects_bad_endpoint() {
        let err = ServiceConfig::from_json(r#"{"api_endpoint": "not a url"}"#).unwrap_err();
        assert!(matches!(err, ExecError::UrlError(_)));
    }

    #[test]
    fn test_config_rejects_market_type() {
        let yaml = "defaults:\n  market_type: overlay\n";
        assert!(matches!(
            ServiceConfig::from_yaml(yaml),
            Err(ExecError::ConfigError(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = ServiceConfig::new("marquee", "https://api.example.com")
            .with_credentials("id", "secret")
            .with_poll_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(5))
            .with_location("HKG");
        assert_eq!(config.client_id.as_deref(), Some("id"));
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.timeout_secs, Some(5));
        assert_eq!(config.defaults.location, "HKG");
    }
}
