//! Strategy definition: an initial portfolio and triggers

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mq_risk::{Instrument, Portfolio, RiskMeasure};

use crate::error::BacktestResult;
use crate::triggers::Trigger;

/// What a backtest simulates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Held on every simulation date
    #[serde(default)]
    pub initial_portfolio: Portfolio,

    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl Strategy {
    pub fn new(initial_portfolio: Portfolio, triggers: Vec<Trigger>) -> Self {
        Self {
            initial_portfolio,
            triggers,
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_initial_instrument(mut self, instrument: Instrument) -> Self {
        self.initial_portfolio.push(instrument);
        self
    }

    /// Measures read by triggers and hedges, without duplicates
    pub fn risks(&self) -> Vec<RiskMeasure> {
        let mut risks: Vec<RiskMeasure> = Vec::new();
        for risk in self.triggers.iter().flat_map(Trigger::risks) {
            if !risks.contains(&risk) {
                risks.push(risk);
            }
        }
        risks
    }

    pub fn to_dict(&self) -> BacktestResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_dict(value: Value) -> BacktestResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> BacktestResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> BacktestResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_yaml(&self) -> BacktestResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(yaml: &str) -> BacktestResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{HedgeAction, TradeDuration};
    use crate::triggers::{TriggerDirection, TriggerRequirements};
    use chrono::NaiveDate;

    #[test]
    fn test_risks_deduplicated() {
        let swap = Instrument::new("Rates", "Swap").with_property("notional_amount", 1e6);
        let hedge = HedgeAction::new(RiskMeasure::delta(), swap);
        let strategy = Strategy::default()
            .with_trigger(Trigger::new(
                TriggerRequirements::periodic("1m".parse().unwrap()),
                vec![hedge.clone().into()],
            ))
            .with_trigger(Trigger::new(
                TriggerRequirements::StrategyRisk {
                    risk: RiskMeasure::delta(),
                    direction: TriggerDirection::Above,
                    level: 1e4,
                },
                vec![hedge.into()],
            ));
        assert_eq!(strategy.risks(), vec![RiskMeasure::delta()]);
    }

    #[test]
    fn test_yaml_definition() {
        let yaml = r#"
triggers:
  - requirements:
      type: Dates
      dates: [2021-12-01]
    actions:
      - type: AddTrade
        name: Vol
        trade_duration:
          tenor: 1m
        priceables:
          - name: call
            asset_class: FX
            instrument_type: Option
            properties:
              pair: EURUSD
              notional_amount: 1000000.0
"#;
        let strategy = Strategy::from_yaml(yaml).unwrap();
        assert!(strategy.initial_portfolio.is_empty());
        let action = match &strategy.triggers[0].actions[0] {
            crate::actions::Action::AddTrade(a) => a.clone(),
            other => panic!("unexpected action {:?}", other),
        };
        assert_eq!(action.priceables[0].text("pair"), Some("EURUSD"));
        assert_eq!(
            action.trade_duration,
            Some(TradeDuration::Tenor("1m".parse().unwrap()))
        );
        assert_eq!(
            strategy.triggers[0].requirements,
            TriggerRequirements::dates([NaiveDate::from_ymd_opt(2021, 12, 1).unwrap()])
        );
    }
}
