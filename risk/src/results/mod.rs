//! Result containers
//!
//! - [`MultipleRiskMeasureResult`]: one instrument, several measures
//! - [`MultipleScenarioResult`]: one instrument, several scenarios
//! - [`PortfolioRiskResult`]: a tree of deferred results mirroring a portfolio
//!
//! [`RiskOutput`] is what a pricing future resolves to: any of the above or a
//! single [`ResultInfo`].

pub mod frame;
pub mod measures;
pub mod portfolio;

pub use frame::{DataFrame, PivotRule, PivotTable, Tabular};
pub use measures::{MeasureValue, MultipleRiskMeasureResult, MultipleScenarioResult};
pub use portfolio::PortfolioRiskResult;

use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::compose::{compose, value_for_date, value_for_dates};
use crate::error::{Result, RiskError};
use crate::measure::{RiskKey, RiskMeasure, Scenario};
use crate::priceable::Instrument;
use crate::transform::Transformer;
use crate::value::ResultInfo;

/// Resolved value of a pricing future
#[derive(Debug, Clone)]
pub enum RiskOutput {
    Value(ResultInfo),
    Measures(MultipleRiskMeasureResult),
    Scenarios(MultipleScenarioResult),
    Portfolio(PortfolioRiskResult),
}

impl RiskOutput {
    pub fn kind_name(&self) -> &'static str {
        match self {
            RiskOutput::Value(r) => r.kind().name(),
            RiskOutput::Measures(_) => "MultipleRiskMeasureResult",
            RiskOutput::Scenarios(_) => "MultipleScenarioResult",
            RiskOutput::Portfolio(_) => "PortfolioRiskResult",
        }
    }

    pub fn as_value(&self) -> Option<&ResultInfo> {
        match self {
            RiskOutput::Value(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_measures(&self) -> Option<&MultipleRiskMeasureResult> {
        match self {
            RiskOutput::Measures(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_scenarios(&self) -> Option<&MultipleScenarioResult> {
        match self {
            RiskOutput::Scenarios(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_portfolio(&self) -> Option<&PortfolioRiskResult> {
        match self {
            RiskOutput::Portfolio(p) => Some(p),
            _ => None,
        }
    }

    /// Key of the first contained value
    pub fn risk_key(&self) -> Result<Option<RiskKey>> {
        Ok(match self {
            RiskOutput::Value(r) => Some(r.risk_key.clone()),
            RiskOutput::Measures(m) => m.risk_key().cloned(),
            RiskOutput::Scenarios(s) => s.iter().next().map(|(_, r)| r.risk_key.clone()),
            RiskOutput::Portfolio(p) => p.first_risk_key()?,
        })
    }

    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        Ok(match self {
            RiskOutput::Value(r) => r.dates(),
            RiskOutput::Measures(m) => m.dates(),
            RiskOutput::Scenarios(s) => s.dates(),
            RiskOutput::Portfolio(p) => p.dates()?,
        })
    }

    pub fn by_date(&self, date: NaiveDate) -> Result<RiskOutput> {
        Ok(match self {
            RiskOutput::Value(r) => RiskOutput::Value(value_for_date(r, date)?),
            RiskOutput::Measures(m) => RiskOutput::Measures(m.by_date(date)?),
            RiskOutput::Scenarios(s) => RiskOutput::Scenarios(s.by_date(date)?),
            RiskOutput::Portfolio(p) => RiskOutput::Portfolio(p.by_date(date)),
        })
    }

    pub fn by_dates(&self, dates: &[NaiveDate]) -> Result<RiskOutput> {
        Ok(match self {
            RiskOutput::Value(r) => RiskOutput::Value(value_for_dates(r, dates)?),
            RiskOutput::Measures(m) => RiskOutput::Measures(m.by_dates(dates)?),
            RiskOutput::Scenarios(s) => RiskOutput::Scenarios(s.by_dates(dates)?),
            RiskOutput::Portfolio(p) => RiskOutput::Portfolio(p.by_dates(dates)),
        })
    }

    pub fn by_measure(&self, measure: &RiskMeasure) -> Result<RiskOutput> {
        match self {
            RiskOutput::Value(r) => match &r.risk_key.risk_measure {
                Some(m) if m != measure => Err(RiskError::NotFound(format!("risk measure {}", measure))),
                _ => Ok(self.clone()),
            },
            RiskOutput::Measures(m) => Ok(match m.by_measure(measure)? {
                MeasureValue::Value(r) => RiskOutput::Value(r.clone()),
                MeasureValue::Scenarios(s) => RiskOutput::Scenarios(s.clone()),
            }),
            RiskOutput::Scenarios(_) => Ok(self.clone()),
            RiskOutput::Portfolio(p) => Ok(RiskOutput::Portfolio(p.by_measure(measure)?)),
        }
    }

    pub fn by_scenario(&self, scenario: &Scenario) -> Result<RiskOutput> {
        match self {
            RiskOutput::Value(r) => match &r.risk_key.scenario {
                Some(s) if s != scenario => Err(RiskError::NotFound(format!("scenario {}", scenario))),
                _ => Ok(self.clone()),
            },
            RiskOutput::Measures(m) => Ok(RiskOutput::Measures(m.by_scenario(scenario)?)),
            RiskOutput::Scenarios(s) => Ok(RiskOutput::Value(s.get(scenario)?.clone())),
            RiskOutput::Portfolio(p) => Ok(RiskOutput::Portfolio(p.by_scenario(scenario))),
        }
    }

    pub fn scale(&self, factor: f64) -> RiskOutput {
        match self {
            RiskOutput::Value(r) => RiskOutput::Value(r.scale(factor)),
            RiskOutput::Measures(m) => RiskOutput::Measures(m.scale(factor)),
            RiskOutput::Scenarios(s) => RiskOutput::Scenarios(s.scale(factor)),
            RiskOutput::Portfolio(p) => RiskOutput::Portfolio(p.scale(factor)),
        }
    }

    pub fn add_scalar(&self, amount: f64) -> RiskOutput {
        match self {
            RiskOutput::Value(r) => RiskOutput::Value(r.add_scalar(amount)),
            RiskOutput::Measures(m) => RiskOutput::Measures(m.add_scalar(amount)),
            RiskOutput::Scenarios(s) => RiskOutput::Scenarios(s.add_scalar(amount)),
            RiskOutput::Portfolio(p) => RiskOutput::Portfolio(p.add_scalar(amount)),
        }
    }

    pub fn transform(&self, transformer: &dyn Transformer) -> Result<RiskOutput> {
        Ok(match self {
            RiskOutput::Value(r) => RiskOutput::Value(transformer.apply(r)?),
            RiskOutput::Measures(m) => RiskOutput::Measures(m.transform(transformer)?),
            RiskOutput::Scenarios(s) => RiskOutput::Scenarios(s.transform(transformer)?),
            RiskOutput::Portfolio(p) => RiskOutput::Portfolio(p.transform(transformer)?),
        })
    }

    /// Algebraic `+` between outputs
    ///
    /// Single results compose; measure maps and portfolios add with overlap
    /// checks; a measure map added to a portfolio joins it as a leaf.
    pub fn add(&self, other: &RiskOutput) -> Result<RiskOutput> {
        match (self, other) {
            (RiskOutput::Value(a), RiskOutput::Value(b)) => Ok(RiskOutput::Value(compose(a, b)?)),
            (RiskOutput::Measures(a), RiskOutput::Measures(b)) => a.add(b),
            (RiskOutput::Portfolio(a), RiskOutput::Portfolio(b)) => Ok(RiskOutput::Portfolio(a.add(b)?)),
            (RiskOutput::Portfolio(a), RiskOutput::Measures(b)) => {
                let b = PortfolioRiskResult::single(b.instrument().clone(), other.clone());
                Ok(RiskOutput::Portfolio(a.add(&b)?))
            }
            (RiskOutput::Measures(a), RiskOutput::Portfolio(b)) => {
                let a = PortfolioRiskResult::single(a.instrument().clone(), self.clone());
                Ok(RiskOutput::Portfolio(a.add(b)?))
            }
            _ => Err(RiskError::CannotCompose {
                lhs: self.kind_name(),
                rhs: other.kind_name(),
            }),
        }
    }

    /// View an instrument leaf as a measure map
    pub(crate) fn to_measures(
        &self,
        instrument: &Instrument,
        default_measure: Option<&RiskMeasure>,
    ) -> Result<MultipleRiskMeasureResult> {
        let measure_of = |key: Option<&RiskKey>| {
            key.and_then(|k| k.risk_measure.clone())
                .or_else(|| default_measure.cloned())
                .ok_or_else(|| RiskError::InvalidArgument("result has no risk measure".to_string()))
        };
        match self {
            RiskOutput::Measures(m) => Ok(m.clone()),
            RiskOutput::Value(r) => Ok(MultipleRiskMeasureResult::new(
                instrument.clone(),
                IndexMap::from([(measure_of(Some(&r.risk_key))?, MeasureValue::Value(r.clone()))]),
            )),
            RiskOutput::Scenarios(s) => {
                let key = s.iter().next().map(|(_, r)| &r.risk_key);
                Ok(MultipleRiskMeasureResult::new(
                    instrument.clone(),
                    IndexMap::from([(measure_of(key)?, MeasureValue::Scenarios(s.clone()))]),
                ))
            }
            RiskOutput::Portfolio(_) => Err(RiskError::InvalidArgument(
                "portfolio result is not an instrument leaf".to_string(),
            )),
        }
    }
}

impl From<ResultInfo> for RiskOutput {
    fn from(r: ResultInfo) -> Self {
        RiskOutput::Value(r)
    }
}

impl From<MultipleRiskMeasureResult> for RiskOutput {
    fn from(m: MultipleRiskMeasureResult) -> Self {
        RiskOutput::Measures(m)
    }
}

impl From<MultipleScenarioResult> for RiskOutput {
    fn from(s: MultipleScenarioResult) -> Self {
        RiskOutput::Scenarios(s)
    }
}

impl From<PortfolioRiskResult> for RiskOutput {
    fn from(p: PortfolioRiskResult) -> Self {
        RiskOutput::Portfolio(p)
    }
}
