//! # mq-risk: Risk Result Composition for the Marquee Risk Service
//!
//! This library models the results returned by the risk calculation service
//! and the algebra used to combine them across dates, measures, scenarios
//! and portfolios.
//!
//! ## Core Components
//!
//! - **ResultInfo**: a computed value (float, series, table, error, N/A)
//!   with its provenance [`RiskKey`] and unit
//! - **Composition**: `compose`, `aggregate_results`, `aggregate_risk`,
//!   `subtract_risk`, `sort_risk`
//! - **PricingFuture**: deferred results resolved by a batch dispatch
//! - **Containers**: [`MultipleRiskMeasureResult`], [`MultipleScenarioResult`],
//!   [`PortfolioRiskResult`] with slicing, `+` and tabular export
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::NaiveDate;
//! use mq_risk::{compose, ResultInfo, RiskKey, RiskMeasure};
//!
//! let key = |d: u32| RiskKey {
//!     date: NaiveDate::from_ymd_opt(2021, 12, d),
//!     risk_measure: Some(RiskMeasure::price()),
//!     ..Default::default()
//! };
//!
//! let day1 = ResultInfo::float(key(1), 100.0, Some("USD".to_string()));
//! let day2 = ResultInfo::float(key(2), 101.5, Some("USD".to_string()));
//!
//! // Values on different dates compose into a series
//! let series = compose(&day1, &day2).unwrap();
//! assert_eq!(series.as_series().unwrap().len(), 2);
//! ```

pub mod compose;
pub mod config;
pub mod decode;
pub mod error;
pub mod future;
pub mod measure;
pub mod priceable;
pub mod results;
pub mod transform;
pub mod value;

pub use compose::{
    aggregate_results, aggregate_risk, compose, compose_all, point_sort_order, sort_risk,
    subtract_risk, value_for_date, value_for_dates,
};
pub use config::{DisplayOptions, RiskConfig};
pub use decode::{decode_datum, decode_response, DatumType};
pub use error::{Result, RiskError};
pub use future::{BatchScope, PricingFuture, ScopeState};
pub use measure::{
    combine_risk_key, risk_keys_compatible, Market, MarketKind, RiskKey, RiskMeasure,
    RiskRequestParams, Scenario,
};
pub use priceable::{Instrument, Portfolio, PortfolioPath, Priceable};
pub use results::{
    DataFrame, MeasureValue, MultipleRiskMeasureResult, MultipleScenarioResult, PivotTable,
    PortfolioRiskResult, RiskOutput, Tabular,
};
pub use transform::{ResultWithInfoAggregator, Transformer};
pub use value::{Cell, ResultInfo, ResultKind, ResultValue, RiskTable, TableRow};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _: Option<RiskKey> = None;
        let _: Option<ResultInfo> = None;
        let _: Option<PricingFuture<RiskOutput>> = None;
        let _: Option<PortfolioRiskResult> = None;
        let _: Option<RiskError> = None;
    }
}
