//! Backtest engine
//!
//! A run walks the simulation dates in four phases:
//!
//! 1. Triggers that do not read the backtest's own results are evaluated
//!    up front and their actions booked without valuation.
//! 2. Every portfolio and unscaled hedge is valued in one batch.
//! 3. Date by date, hedges are scaled and path-dependent triggers and
//!    actions are applied, valuing what they add immediately.
//! 4. Open and close payments are priced in one batch and the cash
//!    balance is rolled forward.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn};

use mq_exec::RiskApi;
use mq_risk::RiskMeasure;

use crate::actions::{Action, TransactionCostModel};
use crate::config::BacktestConfig;
use crate::dates::date_grid;
use crate::error::{BacktestError, BacktestResult};
use crate::strategy::Strategy;
use crate::triggers::CalcType;

use super::handlers::{
    apply_scaling, handler_for, value_scaling_portfolios, PricingFactory, RunContext, Valuation,
};
use super::objects::{BackTest, FinalDateCache};

/// Runs strategies against a risk service
pub struct GenericEngine {
    api: Arc<dyn RiskApi>,
    config: BacktestConfig,
}

impl GenericEngine {
    pub fn new(api: Arc<dyn RiskApi>) -> Self {
        Self {
            api,
            config: BacktestConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BacktestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn supports_strategy(&self, strategy: &Strategy) -> bool {
        self.check_strategy(strategy).is_ok()
    }

    /// Reject strategies the engine cannot run
    pub fn check_strategy(&self, strategy: &Strategy) -> BacktestResult<()> {
        for trigger in &strategy.triggers {
            for action in &trigger.actions {
                match action {
                    Action::AddTrade(a) => {
                        if a.priceables.is_empty() {
                            return Err(BacktestError::UnsupportedStrategy(
                                "add trade action without priceables".to_string(),
                            ));
                        }
                        check_cost_model(&a.transaction_cost)?;
                    }
                    Action::Hedge(a) => {
                        if a.priceable.number(&a.scaling_parameter).is_none() {
                            return Err(BacktestError::UnsupportedStrategy(format!(
                                "hedge {} has no numeric property {} to scale",
                                a.trade_name(),
                                a.scaling_parameter
                            )));
                        }
                        check_cost_model(&a.transaction_cost)?;
                    }
                    Action::ExitTrade(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Run on the configured date grid between `start` and `end`
    pub async fn run_backtest(
        &self,
        strategy: &Strategy,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BacktestResult<BackTest> {
        let states = date_grid(start, end, self.config.frequency, &self.config.calendar())?;
        if states.is_empty() {
            return Err(BacktestError::no_states(start, end));
        }
        self.run_backtest_on_states(strategy, states).await
    }

    /// Run on explicit simulation dates
    pub async fn run_backtest_on_states(
        &self,
        strategy: &Strategy,
        states: Vec<NaiveDate>,
    ) -> BacktestResult<BackTest> {
        self.check_strategy(strategy)?;

        let mut risks = self.config.risks.clone();
        for risk in strategy.risks() {
            if !risks.contains(&risk) {
                risks.push(risk);
            }
        }
        let mut backtest = BackTest::new(
            strategy.clone(),
            states,
            risks,
            self.config.cash_currency.clone(),
        )?;
        let calendar = self.config.calendar();
        let factory = PricingFactory::new(Arc::clone(&self.api), self.config.location.clone());
        let mut cache = FinalDateCache::new(calendar.clone());
        let states = backtest.states().to_vec();

        info!(
            "Running backtest from {} to {} over {} dates",
            states[0],
            states[states.len() - 1],
            states.len()
        );

        for state in &states {
            for priceable in strategy.initial_portfolio.iter() {
                backtest.add_trade(*state, priceable.clone());
            }
        }

        // Phase 1: triggers independent of the backtest's results
        let mut path_dependent: Vec<(&Action, Vec<NaiveDate>)> = Vec::new();
        {
            let mut run = RunContext {
                factory: &factory,
                cache: &mut cache,
                mode: Valuation::Deferred,
            };
            for trigger in &strategy.triggers {
                if trigger.calc_type() == CalcType::PathDependent {
                    continue;
                }
                let dates = trigger.triggered_dates(&backtest, &calendar)?;
                debug!("Trigger fired on {} dates", dates.len());
                if dates.is_empty() {
                    continue;
                }
                for action in &trigger.actions {
                    if action.calc_type() == CalcType::PathDependent {
                        path_dependent.push((action, dates.clone()));
                    } else {
                        handler_for(action)
                            .apply_action(&dates, &mut backtest, &mut run)
                            .await?;
                    }
                }
            }
        }

        // Phase 2: batched valuation
        self.value_portfolios(&mut backtest, &factory).await?;
        let mut scaling: Vec<_> = std::mem::take(&mut backtest.scaling_portfolios)
            .into_values()
            .flatten()
            .collect();
        if !scaling.is_empty() {
            value_scaling_portfolios(&mut backtest, &factory, &mut scaling).await?;
        }
        for portfolio in scaling {
            backtest.add_scaling_portfolio(portfolio);
        }
        info!(
            "Valued {} portfolios in {} calculation calls",
            backtest.portfolio_dict.len(),
            backtest.calc_calls
        );

        // Phase 3: date by date
        let mut run = RunContext {
            factory: &factory,
            cache: &mut cache,
            mode: Valuation::Immediate,
        };
        for state in &states {
            let due = backtest
                .scaling_portfolios
                .get(state)
                .cloned()
                .unwrap_or_default();
            for portfolio in &due {
                apply_scaling(&mut backtest, portfolio)?;
            }

            for trigger in &strategy.triggers {
                if trigger.calc_type() != CalcType::PathDependent {
                    continue;
                }
                if trigger.has_triggered(*state, &backtest, &calendar)? {
                    debug!("Path dependent trigger fired on {}", state);
                    for action in &trigger.actions {
                        handler_for(action)
                            .apply_action(&[*state], &mut backtest, &mut run)
                            .await?;
                    }
                }
            }

            for (action, dates) in &path_dependent {
                if dates.contains(state) {
                    handler_for(action)
                        .apply_action(&[*state], &mut backtest, &mut run)
                        .await?;
                }
            }
        }

        // Phase 4: cash
        self.price_cash(&mut backtest, &factory).await?;
        backtest.settle_cash();

        info!(
            "Backtest complete: {} calculation calls, {} calculations",
            backtest.calc_calls, backtest.calculations
        );
        Ok(backtest)
    }

    async fn value_portfolios(
        &self,
        backtest: &mut BackTest,
        factory: &PricingFactory,
    ) -> BacktestResult<()> {
        let risks = backtest.risks().to_vec();
        let first = match backtest.states().first() {
            Some(date) => *date,
            None => return Ok(()),
        };

        let mut ctx = factory.context(first, None);
        ctx.enter();
        let mut pending = Vec::new();
        for (date, portfolio) in &backtest.portfolio_dict {
            if portfolio.is_empty() {
                continue;
            }
            let result = ctx.calc_portfolio_at(portfolio, &risks, *date).await?;
            pending.push((*date, result));
        }
        ctx.exit().await?;

        for (date, result) in pending {
            backtest.record_calculation(result.portfolio().all_instruments().len(), risks.len(), 1);
            backtest.add_results(date, result);
        }
        Ok(())
    }

    async fn price_cash(&self, backtest: &mut BackTest, factory: &PricingFactory) -> BacktestResult<()> {
        let price = RiskMeasure::price();
        let first = match backtest.states().first() {
            Some(date) => *date,
            None => return Ok(()),
        };

        let mut ctx = factory.context(first, None);
        ctx.enter();
        let mut pending = Vec::new();
        for (booking, payments) in &backtest.cash_payments {
            for (i, payment) in payments.iter().enumerate() {
                if payment.is_priced() {
                    continue;
                }
                let future = ctx.calc_at(&payment.trade, &price, payment.effective_date).await;
                pending.push((*booking, i, future));
            }
        }
        ctx.exit().await?;
        if pending.is_empty() {
            return Ok(());
        }

        backtest.record_calculation(pending.len(), 1, 1);
        for (booking, i, future) in pending {
            let payment = match backtest.cash_payments.get_mut(&booking).and_then(|p| p.get_mut(i)) {
                Some(payment) => payment,
                None => continue,
            };
            match future.result() {
                Ok(value) => match value.total() {
                    Some(v) if !value.is_error() => payment.amount = Some(payment.direction * v),
                    _ => warn!(
                        "Could not price {} on {}: {}",
                        payment.trade_name(),
                        payment.effective_date,
                        value
                    ),
                },
                Err(e) => warn!(
                    "Could not price {} on {}: {}",
                    payment.trade_name(),
                    payment.effective_date,
                    e
                ),
            }
        }
        Ok(())
    }
}

fn check_cost_model(model: &TransactionCostModel) -> BacktestResult<()> {
    if let TransactionCostModel::Aggregate { models, .. } = model {
        if models.is_empty() {
            return Err(BacktestError::UnsupportedStrategy(
                "aggregate transaction cost model without models".to_string(),
            ));
        }
        for m in models {
            check_cost_model(m)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{AddTradeAction, HedgeAction};
    use crate::dates::Frequency;
    use crate::triggers::{Trigger, TriggerRequirements};
    use mq_exec::InMemoryRiskApi;
    use mq_risk::Instrument;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, d).unwrap()
    }

    fn engine() -> GenericEngine {
        GenericEngine::new(Arc::new(InMemoryRiskApi::constant(1.0)))
    }

    #[test]
    fn test_check_strategy() {
        let engine = engine();
        assert!(engine.supports_strategy(&Strategy::default()));

        let unscalable = HedgeAction::new(RiskMeasure::delta(), Instrument::new("FX", "Forward"));
        let strategy = Strategy::default().with_trigger(Trigger::new(
            TriggerRequirements::dates([date(1)]),
            vec![unscalable.into()],
        ));
        assert!(matches!(
            engine.check_strategy(&strategy),
            Err(BacktestError::UnsupportedStrategy(_))
        ));

        let no_costs = AddTradeAction::new(vec![Instrument::new("FX", "Forward")])
            .with_transaction_cost(TransactionCostModel::Aggregate {
                models: vec![],
                mode: crate::actions::CostAggregation::Sum,
            });
        let strategy = Strategy::default().with_trigger(Trigger::new(
            TriggerRequirements::dates([date(1)]),
            vec![no_costs.into()],
        ));
        assert!(!engine.supports_strategy(&strategy));
    }

    #[tokio::test]
    async fn test_empty_range_is_rejected() {
        let engine = engine().with_config(BacktestConfig::default().with_frequency(Frequency::MonthEnd));
        let err = engine
            .run_backtest(&Strategy::default(), date(1), date(3))
            .await
            .unwrap_err();
        assert!(matches!(err, BacktestError::InsufficientData(_)));
    }

    #[tokio::test]
    async fn test_initial_portfolio_held_throughout() {
        let engine = engine().with_config(BacktestConfig::default().with_frequency(Frequency::BusinessDaily));
        let strategy = Strategy::default()
            .with_initial_instrument(Instrument::new("FX", "Forward").with_name("fwd"));
        let backtest = engine.run_backtest(&strategy, date(1), date(7)).await.unwrap();

        assert_eq!(backtest.states().len(), 5);
        for state in backtest.states() {
            assert_eq!(backtest.risk_value(*state, &RiskMeasure::price()).unwrap(), Some(1.0));
            assert_eq!(backtest.cash_dict()[state], 0.0);
        }
        assert_eq!(backtest.calc_calls, 5);
    }
}
