//! Rate limiting implementation
//!
//! Token bucket throttling of risk service requests, one bucket per
//! provider.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

use crate::error::{ExecError, ExecResult};

/// Rate limiter for risk service requests
pub struct RateLimiter {
    provider: String,
    limiter: DefaultDirectRateLimiter,
    requests_per_second: u32,
    burst_size: u32,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// Zero rates are raised to one request per second.
    ///
    /// # Arguments
    /// * `provider` - Provider identifier
    /// * `requests_per_second` - Maximum requests per second
    /// * `burst_size` - Maximum burst capacity
    pub fn new(provider: impl Into<String>, requests_per_second: u32, burst_size: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(burst_size).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            provider: provider.into(),
            limiter: GovRateLimiter::direct(quota),
            requests_per_second: rate.get(),
            burst_size: burst.get(),
        }
    }

    /// Wait until the rate limit allows the request
    pub async fn check(&self) -> ExecResult<()> {
        if self.limiter.check().is_err() {
            self.limiter.until_ready().await;
        }
        Ok(())
    }

    /// Try to acquire permission without waiting
    ///
    /// # Returns
    /// * `Ok(())` - Permission granted
    /// * `Err(ExecError::RateLimitExceeded)` - Rate limit exceeded
    pub fn try_check(&self) -> ExecResult<()> {
        self.limiter.check().map_err(|_| ExecError::RateLimitExceeded {
            provider: self.provider.clone(),
            message: format!(
                "Rate limit exceeded: {} requests/sec, burst {}",
                self.requests_per_second, self.burst_size
            ),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second
    }

    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Requests per second
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_size: u32,
}

impl RateLimiterConfig {
    /// Create a new rate limiter configuration
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }

    /// Build a rate limiter with this configuration
    pub fn build(&self, provider: impl Into<String>) -> RateLimiter {
        RateLimiter::new(provider, self.requests_per_second, self.burst_size)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_rate_limiter_allows_requests() {
        let limiter = RateLimiter::new("marquee", 10, 10);
        assert!(limiter.try_check().is_ok());
    }

    #[tokio::test]
    async fn test_rate_limiter_enforces_limit() {
        let limiter = RateLimiter::new("marquee", 2, 2);

        assert!(limiter.try_check().is_ok());
        assert!(limiter.try_check().is_ok());

        let result = limiter.try_check();
        assert!(matches!(result, Err(ExecError::RateLimitExceeded { .. })));
    }

    #[tokio::test]
    async fn test_rate_limiter_check_waits() {
        let limiter = RateLimiter::new("marquee", 2, 2);

        limiter.try_check().unwrap();
        limiter.try_check().unwrap();

        let start = Instant::now();
        limiter.check().await.unwrap();
        assert!(start.elapsed() > Duration::from_millis(100));
    }

    #[test]
    fn test_rate_limiter_build() {
        let limiter = RateLimiterConfig::new(5, 10).build("marquee");
        assert_eq!(limiter.provider(), "marquee");
        assert_eq!(limiter.requests_per_second(), 5);
        assert_eq!(limiter.burst_size(), 10);
    }

    #[test]
    fn test_zero_rate_raised() {
        let limiter = RateLimiter::new("marquee", 0, 0);
        assert_eq!(limiter.requests_per_second(), 1);
        assert_eq!(limiter.burst_size(), 1);
    }
}
