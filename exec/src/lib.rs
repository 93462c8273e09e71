//! # mq-exec: Batched Pricing for the Marquee Risk Service
//!
//! This library turns calculation calls on instruments and portfolios into
//! risk service requests, batching them while a pricing context is entered
//! and resolving the returned futures when the batch is dispatched.
//!
//! ## Core Components
//!
//! - **PricingContext**: registers calculations, groups them into requests
//!   and resolves deferred results
//! - **RiskApi**: trait for the risk calculation service (`submit`/`poll`)
//! - **HttpRiskApi**: the service over HTTP
//! - **InMemoryRiskApi**: a deterministic service for tests and demos
//! - **Rate Limiting**: request throttling per provider
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use mq_exec::{HttpRiskApi, PricingContext, ServiceConfig};
//! use mq_risk::{Instrument, RiskMeasure};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env()?;
//!     let api = Arc::new(HttpRiskApi::new(config.clone())?);
//!     let date = NaiveDate::from_ymd_opt(2021, 12, 1).unwrap();
//!     let mut ctx = PricingContext::from_config(api, &config, date);
//!
//!     let swap = Instrument::new("Rates", "Swap")
//!         .with_property("notional_amount", 1e8)
//!         .with_property("termination_date", "10y");
//!
//!     ctx.enter();
//!     let price = ctx.calc(&swap, &RiskMeasure::price()).await;
//!     let delta = ctx.calc(&swap, &RiskMeasure::delta()).await;
//!     ctx.exit().await?;
//!
//!     println!("{} {}", price.result()?, delta.result()?);
//!     Ok(())
//! }
//! ```

// Public modules
pub mod config;
pub mod context;
pub mod error;

// Re-export main types
pub use config::{PricingDefaults, ServiceConfig};
pub use context::PricingContext;
pub use error::{ExecError, ExecResult};

// Risk service clients
pub mod api {
    pub mod http;
    pub mod memory;
    pub mod risk_api;

    pub use http::HttpRiskApi;
    pub use memory::{InMemoryRiskApi, PriceQuery};
    pub use risk_api::{
        PollResponse, PricingDateAndMarket, RiskApi, RiskPosition, RiskRequest, SubmitResponse,
    };
}

// Rate limiting
pub mod ratelimit;

pub use api::{HttpRiskApi, InMemoryRiskApi, RiskApi, RiskRequest};
pub use ratelimit::{RateLimiter, RateLimiterConfig};

// Initialize tracing
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _: Option<PricingContext> = None;
        let _: Option<ServiceConfig> = None;
        let _: Option<RateLimiterConfig> = None;
        let _: Option<ExecError> = None;
    }
}
