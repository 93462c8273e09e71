//! Backtest state, action handlers, engine and reports

pub mod engine;
pub mod handlers;
pub mod objects;
pub mod report;

pub use engine::GenericEngine;
pub use handlers::{ActionHandler, PricingFactory, RunContext, Valuation};
pub use objects::{BackTest, CashPayment, FinalDateCache, Hedge, PaymentKind, ScalingPortfolio};
