//! Rate limiting
//!
//! Throttles requests sent to the risk service.

pub mod limiter;

pub use limiter::{RateLimiter, RateLimiterConfig};
