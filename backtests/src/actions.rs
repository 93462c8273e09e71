//! Actions fired by triggers
//!
//! An action describes a state transition of the backtest: adding trades,
//! adding a hedge whose size is fixed later, or closing trades. The
//! [`handlers`](crate::backtest::handlers) module applies them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use mq_risk::{Instrument, RiskMeasure};

use crate::dates::RelativeDateRule;
use crate::error::{BacktestError, BacktestResult};
use crate::triggers::CalcType;

/// How long a trade stays in the portfolio after it is added
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDuration {
    /// Held through a fixed date
    Date(NaiveDate),
    /// Held through the date in an instrument property, e.g. `expiration_date`
    Attribute(String),
    /// Held for a tenor from the trade date
    Tenor(RelativeDateRule),
}

/// How several cost models combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostAggregation {
    Sum,
    Max,
    Min,
}

/// Cost charged when a trade is opened or closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionCostModel {
    /// Fixed amount per trade
    Constant { cost: f64 },
    /// `scaling_level` per unit of an instrument property
    Scaled {
        scaling_property: String,
        scaling_level: f64,
    },
    /// Several models combined
    Aggregate {
        models: Vec<TransactionCostModel>,
        mode: CostAggregation,
    },
}

impl Default for TransactionCostModel {
    fn default() -> Self {
        TransactionCostModel::Constant { cost: 0.0 }
    }
}

impl TransactionCostModel {
    /// Cost of trading `trade` once
    pub fn cost(&self, trade: &Instrument) -> BacktestResult<f64> {
        match self {
            TransactionCostModel::Constant { cost } => Ok(*cost),
            TransactionCostModel::Scaled {
                scaling_property,
                scaling_level,
            } => {
                let size = trade.number(scaling_property).ok_or_else(|| {
                    BacktestError::InvalidParameter(format!(
                        "{} has no numeric property {} to scale costs by",
                        trade.display_name(),
                        scaling_property
                    ))
                })?;
                Ok(size.abs() * scaling_level)
            }
            TransactionCostModel::Aggregate { models, mode } => {
                let costs = models
                    .iter()
                    .map(|m| m.cost(trade))
                    .collect::<BacktestResult<Vec<f64>>>()?;
                if costs.is_empty() {
                    return Ok(0.0);
                }
                Ok(match mode {
                    CostAggregation::Sum => costs.iter().sum(),
                    CostAggregation::Max => costs.iter().copied().fold(f64::MIN, f64::max),
                    CostAggregation::Min => costs.iter().copied().fold(f64::MAX, f64::min),
                })
            }
        }
    }
}

/// Add instruments to the portfolio on every triggered date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddTradeAction {
    pub priceables: Vec<Instrument>,

    /// Open-ended when absent
    #[serde(default)]
    pub trade_duration: Option<TradeDuration>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub transaction_cost: TransactionCostModel,
}

impl AddTradeAction {
    pub fn new(priceables: Vec<Instrument>) -> Self {
        Self {
            priceables,
            trade_duration: None,
            name: None,
            transaction_cost: TransactionCostModel::default(),
        }
    }

    pub fn with_trade_duration(mut self, duration: TradeDuration) -> Self {
        self.trade_duration = Some(duration);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_transaction_cost(mut self, model: TransactionCostModel) -> Self {
        self.transaction_cost = model;
        self
    }

    pub fn calc_type(&self) -> CalcType {
        CalcType::Simple
    }

    /// Name given to the `i`-th priceable when it has none
    pub fn priceable_name(&self, i: usize) -> String {
        match self.priceables.get(i).and_then(|p| p.name.clone()) {
            Some(name) => name,
            None => format!("{}_Priceable{}", self.name.as_deref().unwrap_or("AddTrade"), i),
        }
    }
}

/// Add a trade sized to offset the portfolio's exposure to `risk`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeAction {
    pub risk: RiskMeasure,

    pub priceable: Instrument,

    #[serde(default)]
    pub trade_duration: Option<TradeDuration>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub csa_term: Option<String>,

    /// Instrument property multiplied by the scaling factor
    #[serde(default = "default_scaling_parameter")]
    pub scaling_parameter: String,

    #[serde(default)]
    pub transaction_cost: TransactionCostModel,
}

fn default_scaling_parameter() -> String {
    "notional_amount".to_string()
}

impl HedgeAction {
    pub fn new(risk: RiskMeasure, priceable: Instrument) -> Self {
        Self {
            risk,
            priceable,
            trade_duration: None,
            name: None,
            csa_term: None,
            scaling_parameter: default_scaling_parameter(),
            transaction_cost: TransactionCostModel::default(),
        }
    }

    pub fn with_trade_duration(mut self, duration: TradeDuration) -> Self {
        self.trade_duration = Some(duration);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_csa_term(mut self, csa_term: impl Into<String>) -> Self {
        self.csa_term = Some(csa_term.into());
        self
    }

    pub fn with_scaling_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.scaling_parameter = parameter.into();
        self
    }

    pub fn with_transaction_cost(mut self, model: TransactionCostModel) -> Self {
        self.transaction_cost = model;
        self
    }

    pub fn calc_type(&self) -> CalcType {
        CalcType::SemiPathDependent
    }

    pub fn trade_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.priceable.name.clone())
            .unwrap_or_else(|| "Hedge".to_string())
    }
}

/// Close trades still held on the triggered date
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitTradeAction {
    /// Names of the priceables whose trades are closed; all trades when absent
    #[serde(default)]
    pub priceable_names: Option<Vec<String>>,

    #[serde(default)]
    pub name: Option<String>,
}

impl ExitTradeAction {
    /// Close every held trade
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            priceable_names: Some(names.into_iter().map(Into::into).collect()),
            name: None,
        }
    }

    pub fn calc_type(&self) -> CalcType {
        CalcType::PathDependent
    }

    /// Whether a trade named `trade_name` was created from a listed priceable
    pub fn matches(&self, trade_name: &str) -> bool {
        match &self.priceable_names {
            None => true,
            Some(names) => names.iter().any(|n| {
                trade_name == n
                    || trade_name
                        .strip_prefix(n.as_str())
                        .map_or(false, |rest| rest.starts_with('_'))
            }),
        }
    }
}

/// Any action a trigger can fire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    AddTrade(AddTradeAction),
    Hedge(HedgeAction),
    ExitTrade(ExitTradeAction),
}

impl Action {
    pub fn calc_type(&self) -> CalcType {
        match self {
            Action::AddTrade(a) => a.calc_type(),
            Action::Hedge(a) => a.calc_type(),
            Action::ExitTrade(a) => a.calc_type(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Action::AddTrade(a) => a.name.as_deref(),
            Action::Hedge(a) => a.name.as_deref(),
            Action::ExitTrade(a) => a.name.as_deref(),
        }
    }

    /// Measure the action needs computed on every simulation date
    pub fn risk(&self) -> Option<&RiskMeasure> {
        match self {
            Action::Hedge(a) => Some(&a.risk),
            _ => None,
        }
    }
}

impl From<AddTradeAction> for Action {
    fn from(action: AddTradeAction) -> Self {
        Action::AddTrade(action)
    }
}

impl From<HedgeAction> for Action {
    fn from(action: HedgeAction) -> Self {
        Action::Hedge(action)
    }
}

impl From<ExitTradeAction> for Action {
    fn from(action: ExitTradeAction) -> Self {
        Action::ExitTrade(action)
    }
}

/// Name of the trade created from `base` on `date`
pub fn trade_name(base: &str, date: NaiveDate) -> String {
    format!("{}_{}", base, date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn swap() -> Instrument {
        Instrument::new("Rates", "Swap").with_property("notional_amount", -2e6)
    }

    #[test]
    fn test_cost_models() {
        let constant = TransactionCostModel::Constant { cost: 50.0 };
        assert_eq!(constant.cost(&swap()).unwrap(), 50.0);

        let scaled = TransactionCostModel::Scaled {
            scaling_property: "notional_amount".to_string(),
            scaling_level: 1e-4,
        };
        assert_relative_eq!(scaled.cost(&swap()).unwrap(), 200.0);

        let max = TransactionCostModel::Aggregate {
            models: vec![constant.clone(), scaled.clone()],
            mode: CostAggregation::Max,
        };
        assert_relative_eq!(max.cost(&swap()).unwrap(), 200.0);

        let min = TransactionCostModel::Aggregate {
            models: vec![constant, scaled.clone()],
            mode: CostAggregation::Min,
        };
        assert_relative_eq!(min.cost(&swap()).unwrap(), 50.0);

        let missing = Instrument::new("FX", "Option");
        assert!(matches!(
            scaled.cost(&missing),
            Err(BacktestError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_priceable_names() {
        let action = AddTradeAction::new(vec![
            Instrument::new("FX", "Option").with_name("call"),
            Instrument::new("FX", "Option"),
        ])
        .with_name("Vol");
        assert_eq!(action.priceable_name(0), "call");
        assert_eq!(action.priceable_name(1), "Vol_Priceable1");
    }

    #[test]
    fn test_exit_matches_trade_names() {
        let exit = ExitTradeAction::named(["call"]);
        assert!(exit.matches("call"));
        assert!(exit.matches(&trade_name("call", NaiveDate::from_ymd_opt(2021, 12, 1).unwrap())));
        assert!(!exit.matches("callable_2021-12-01"));
        assert!(ExitTradeAction::all().matches("anything"));
    }

    #[test]
    fn test_calc_types() {
        let hedge: Action = HedgeAction::new(RiskMeasure::delta(), swap()).into();
        assert_eq!(hedge.calc_type(), CalcType::SemiPathDependent);
        assert_eq!(hedge.risk(), Some(&RiskMeasure::delta()));
        let exit: Action = ExitTradeAction::all().into();
        assert_eq!(exit.calc_type(), CalcType::PathDependent);
    }

    #[test]
    fn test_duration_serde() {
        let tenor = TradeDuration::Tenor("3m".parse().unwrap());
        let json = serde_json::to_string(&tenor).unwrap();
        assert_eq!(json, r#"{"tenor":"3m"}"#);
        let back: TradeDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tenor);
    }
}
