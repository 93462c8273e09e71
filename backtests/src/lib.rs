//! # mq-backtests: Trigger/Action Backtesting over the Marquee Risk Service
//!
//! This library simulates a strategy over a series of dates: triggers fire
//! actions that add trades, size hedges or close positions, every holding
//! is valued through batched pricing contexts, and the resulting risk and
//! cash are reported per date.
//!
//! ## Core Components
//!
//! - **Strategy**: an initial portfolio plus [`Trigger`]s and their [`Action`]s
//! - **GenericEngine**: runs a strategy in batched and path-dependent phases
//! - **BackTest**: per-date portfolios, results, cash payments and hedges
//! - **Reports**: `result_summary` and `trade_ledger` frames
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use mq_backtests::{
//!     AddTradeAction, BacktestConfig, Frequency, GenericEngine, Strategy, Trigger,
//!     TriggerRequirements,
//! };
//! use mq_exec::InMemoryRiskApi;
//! use mq_risk::Instrument;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let api = Arc::new(InMemoryRiskApi::constant(100.0));
//!     let engine = GenericEngine::new(api)
//!         .with_config(BacktestConfig::default().with_frequency(Frequency::BusinessDaily));
//!
//!     let option = Instrument::new("FX", "Option")
//!         .with_name("call")
//!         .with_property("pair", "EURUSD")
//!         .with_property("notional_amount", 1e6);
//!     let strategy = Strategy::default().with_trigger(Trigger::new(
//!         TriggerRequirements::periodic("1m".parse()?),
//!         vec![AddTradeAction::new(vec![option]).into()],
//!     ));
//!
//!     let start = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
//!     let end = NaiveDate::from_ymd_opt(2021, 6, 30).unwrap();
//!     let backtest = engine.run_backtest(&strategy, start, end).await?;
//!     println!("{:?}", backtest.result_summary()?);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod backtest;
pub mod config;
pub mod dates;
pub mod error;
pub mod strategy;
pub mod triggers;

pub use actions::{
    trade_name, Action, AddTradeAction, CostAggregation, ExitTradeAction, HedgeAction,
    TradeDuration, TransactionCostModel,
};
pub use backtest::{
    ActionHandler, BackTest, CashPayment, GenericEngine, Hedge, PaymentKind, ScalingPortfolio,
};
pub use config::BacktestConfig;
pub use dates::{date_grid, Frequency, HolidayCalendar, RelativeDateRule};
pub use error::{BacktestError, BacktestResult};
pub use strategy::Strategy;
pub use triggers::{AggregationMode, CalcType, Trigger, TriggerDirection, TriggerRequirements};

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
        let _: Option<GenericEngine> = None;
        let _: Option<BackTest> = None;
        let _: Option<Strategy> = None;
        let _: Option<BacktestError> = None;
        let _: Option<BacktestConfig> = None;
    }
}
