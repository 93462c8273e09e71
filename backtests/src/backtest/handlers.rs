//! Action handlers
//!
//! Each action type has a handler that applies it on a set of triggered
//! dates. Handlers run in two modes: [`Valuation::Deferred`] only books
//! trades and cash, leaving valuation to the engine's batched pass, while
//! [`Valuation::Immediate`] values what it adds straight away so that later
//! path-dependent decisions can see it.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use mq_exec::{PricingContext, RiskApi};
use mq_risk::{Instrument, Portfolio, PortfolioRiskResult, RiskRequestParams};

use crate::actions::{trade_name, Action, AddTradeAction, ExitTradeAction, HedgeAction};
use crate::error::{BacktestError, BacktestResult};

use super::objects::{BackTest, FinalDateCache, Hedge, ScalingPortfolio};

/// Builds pricing contexts against one risk service
pub struct PricingFactory {
    api: Arc<dyn RiskApi>,
    location: String,
}

impl PricingFactory {
    pub fn new(api: Arc<dyn RiskApi>, location: impl Into<String>) -> Self {
        Self {
            api,
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Context pricing on `date`, under a CSA term when given
    pub fn context(&self, date: NaiveDate, csa_term: Option<&str>) -> PricingContext {
        PricingContext::new(Arc::clone(&self.api), date)
            .with_location(self.location.clone())
            .with_params(RiskRequestParams {
                csa_term: csa_term.map(str::to_string),
                ..RiskRequestParams::default()
            })
    }
}

/// When a handler values the trades it adds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Valuation {
    /// Left to the engine's batched valuation pass
    Deferred,
    /// Valued before the handler returns
    Immediate,
}

/// Per-run services shared by the handlers
pub struct RunContext<'a> {
    pub factory: &'a PricingFactory,
    pub cache: &'a mut FinalDateCache,
    pub mode: Valuation,
}

/// Applies one kind of action to the backtest
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Apply the action on each of `dates`
    async fn apply_action(
        &self,
        dates: &[NaiveDate],
        backtest: &mut BackTest,
        run: &mut RunContext<'_>,
    ) -> BacktestResult<()>;
}

/// Handler for `action`
pub fn handler_for(action: &Action) -> Box<dyn ActionHandler> {
    match action {
        Action::AddTrade(a) => Box::new(AddTradeHandler::new(a.clone())),
        Action::Hedge(a) => Box::new(HedgeHandler::new(a.clone())),
        Action::ExitTrade(a) => Box::new(ExitTradeHandler::new(a.clone())),
    }
}

pub struct AddTradeHandler {
    action: AddTradeAction,
}

impl AddTradeHandler {
    pub fn new(action: AddTradeAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl ActionHandler for AddTradeHandler {
    async fn apply_action(
        &self,
        dates: &[NaiveDate],
        backtest: &mut BackTest,
        run: &mut RunContext<'_>,
    ) -> BacktestResult<()> {
        let mut requests = Vec::with_capacity(dates.len() * self.action.priceables.len());
        for date in dates {
            for (i, priceable) in self.action.priceables.iter().enumerate() {
                let named = priceable.clone().with_name(self.action.priceable_name(i));
                requests.push((named, *date));
            }
        }
        let resolved = resolve_trades(run.factory, &requests).await?;

        let mut added = Vec::with_capacity(resolved.len());
        for ((requested, create_date), trade) in requests.iter().zip(resolved) {
            let trade = trade.with_name(trade_name(requested.display_name(), *create_date));
            let final_date =
                run.cache
                    .final_date(&trade, *create_date, self.action.trade_duration.as_ref())?;
            let held = backtest.states_between(*create_date, final_date);
            for date in &held {
                backtest.add_trade(*date, trade.clone());
            }
            backtest.book_trade(&trade, *create_date, final_date, &self.action.transaction_cost)?;
            debug!("Added {} held on {} dates", trade.display_name(), held.len());
            added.push((trade, held));
        }

        if run.mode == Valuation::Immediate {
            value_trades(backtest, run.factory, &added).await?;
        }
        info!("Applied add trade action on {} dates ({} trades)", dates.len(), added.len());
        Ok(())
    }
}

pub struct HedgeHandler {
    action: HedgeAction,
}

impl HedgeHandler {
    pub fn new(action: HedgeAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl ActionHandler for HedgeHandler {
    async fn apply_action(
        &self,
        dates: &[NaiveDate],
        backtest: &mut BackTest,
        run: &mut RunContext<'_>,
    ) -> BacktestResult<()> {
        let base = self.action.trade_name();
        let requests: Vec<(Instrument, NaiveDate)> = dates
            .iter()
            .map(|d| (self.action.priceable.clone().with_name(base.clone()), *d))
            .collect();
        let resolved = resolve_trades(run.factory, &requests).await?;

        let mut portfolios = Vec::with_capacity(resolved.len());
        for ((_, create_date), trade) in requests.iter().zip(resolved) {
            let trade = trade.with_name(trade_name(&base, *create_date));
            let final_date =
                run.cache
                    .final_date(&trade, *create_date, self.action.trade_duration.as_ref())?;
            let held = backtest.states_between(*create_date, final_date);
            if held.is_empty() {
                continue;
            }
            portfolios.push(ScalingPortfolio {
                trade,
                dates: held,
                risk: self.action.risk.clone(),
                csa_term: self.action.csa_term.clone(),
                scaling_parameter: self.action.scaling_parameter.clone(),
                final_date,
                transaction_cost: self.action.transaction_cost.clone(),
                results: BTreeMap::new(),
            });
        }

        match run.mode {
            Valuation::Deferred => {
                for portfolio in portfolios {
                    backtest.add_scaling_portfolio(portfolio);
                }
            }
            Valuation::Immediate => {
                value_scaling_portfolios(backtest, run.factory, &mut portfolios).await?;
                for portfolio in &portfolios {
                    apply_scaling(backtest, portfolio)?;
                }
            }
        }
        info!("Applied hedge action {} on {} dates", base, dates.len());
        Ok(())
    }
}

pub struct ExitTradeHandler {
    action: ExitTradeAction,
}

impl ExitTradeHandler {
    pub fn new(action: ExitTradeAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl ActionHandler for ExitTradeHandler {
    async fn apply_action(
        &self,
        dates: &[NaiveDate],
        backtest: &mut BackTest,
        _run: &mut RunContext<'_>,
    ) -> BacktestResult<()> {
        for date in dates {
            let next = match backtest.next_state_after(*date) {
                Some(next) => next,
                None => continue,
            };
            let held_next: Vec<String> = backtest
                .portfolio(next)
                .map(|p| p.instrument_names().into_iter().map(str::to_string).collect())
                .unwrap_or_default();
            let closed: Vec<Instrument> = backtest
                .portfolio(*date)
                .map(|p| {
                    p.all_instruments()
                        .into_iter()
                        .filter(|i| {
                            self.action.matches(i.display_name())
                                && held_next.iter().any(|n| n == i.display_name())
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if closed.is_empty() {
                continue;
            }
            backtest.close_trades_after(*date, &closed);
            info!("Exited {} trades on {}", closed.len(), date);
        }
        Ok(())
    }
}

/// Resolve every `(instrument, date)` in one batch, keeping the order
pub(crate) async fn resolve_trades(
    factory: &PricingFactory,
    requests: &[(Instrument, NaiveDate)],
) -> BacktestResult<Vec<Instrument>> {
    let first = match requests.first() {
        Some((_, date)) => *date,
        None => return Ok(Vec::new()),
    };
    let mut ctx = factory.context(first, None);
    ctx.enter();
    let mut futures = Vec::with_capacity(requests.len());
    for (instrument, date) in requests {
        futures.push(ctx.resolve_at(instrument, *date).await);
    }
    ctx.exit().await?;

    futures
        .iter()
        .map(|f| f.result().map_err(BacktestError::from))
        .collect()
}

/// Value each trade on the dates it is held and record the results
pub(crate) async fn value_trades(
    backtest: &mut BackTest,
    factory: &PricingFactory,
    trades: &[(Instrument, Vec<NaiveDate>)],
) -> BacktestResult<()> {
    let first = match trades.iter().flat_map(|(_, dates)| dates.first()).min() {
        Some(date) => *date,
        None => return Ok(()),
    };
    let risks = backtest.risks().to_vec();
    let mut ctx = factory.context(first, None);
    ctx.enter();
    let mut pending = Vec::new();
    for (trade, dates) in trades {
        let portfolio = Portfolio::from_instruments(vec![trade.clone()]);
        for date in dates {
            pending.push((*date, ctx.calc_portfolio_at(&portfolio, &risks, *date).await?));
        }
    }
    ctx.exit().await?;

    for (_, dates) in trades.iter().filter(|(_, dates)| !dates.is_empty()) {
        backtest.record_calculation(1, risks.len(), dates.len());
    }
    for (date, result) in pending {
        backtest.add_results(date, result);
    }
    Ok(())
}

/// Value unscaled hedges on every date they are held
///
/// Hedges under different CSA terms are priced in separate contexts.
pub(crate) async fn value_scaling_portfolios(
    backtest: &mut BackTest,
    factory: &PricingFactory,
    portfolios: &mut [ScalingPortfolio],
) -> BacktestResult<()> {
    let risks = backtest.risks().to_vec();
    let mut by_csa: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
    for (i, portfolio) in portfolios.iter().enumerate() {
        by_csa.entry(portfolio.csa_term.clone()).or_default().push(i);
    }

    for (csa_term, indices) in by_csa {
        let first = match indices.iter().filter_map(|i| portfolios[*i].scale_date()).min() {
            Some(date) => date,
            None => continue,
        };
        let mut ctx = factory.context(first, csa_term.as_deref());
        ctx.enter();
        let mut pending: Vec<(usize, NaiveDate, PortfolioRiskResult)> = Vec::new();
        for i in &indices {
            let trade = Portfolio::from_instruments(vec![portfolios[*i].trade.clone()]);
            let dates = portfolios[*i].dates.clone();
            for date in dates {
                pending.push((*i, date, ctx.calc_portfolio_at(&trade, &risks, date).await?));
            }
        }
        ctx.exit().await?;

        for i in &indices {
            backtest.record_calculation(1, risks.len(), portfolios[*i].dates.len());
        }
        for (i, date, result) in pending {
            portfolios[i].results.insert(date, result);
        }
        debug!(
            "Valued {} hedges under CSA term {}",
            indices.len(),
            csa_term.as_deref().unwrap_or("default")
        );
    }
    Ok(())
}

/// Size a hedge against the portfolio's risk on its scale date and add it
///
/// The hedge is skipped when the portfolio has no value for the hedged risk
/// or the hedge itself has none.
pub(crate) fn apply_scaling(backtest: &mut BackTest, portfolio: &ScalingPortfolio) -> BacktestResult<()> {
    let scale_date = match portfolio.scale_date() {
        Some(date) => date,
        None => return Ok(()),
    };

    let base = match backtest.risk_value(scale_date, &portfolio.risk)? {
        Some(value) => value,
        None => {
            warn!(
                "No {} to hedge on {}, skipping {}",
                portfolio.risk,
                scale_date,
                portfolio.trade.display_name()
            );
            return Ok(());
        }
    };
    let hedge = hedge_risk(portfolio, scale_date)?;
    if hedge.abs() < f64::EPSILON {
        warn!(
            "{} has no {} on {}, cannot scale it",
            portfolio.trade.display_name(),
            portfolio.risk,
            scale_date
        );
        return Ok(());
    }

    let scaling_factor = base / hedge;
    let multiplier = -scaling_factor;
    let scaled = portfolio
        .trade
        .scale(multiplier, Some(portfolio.scaling_parameter.as_str()))?;

    for date in &portfolio.dates {
        let result = match portfolio.results.get(date) {
            Some(result) => result,
            None => continue,
        };
        let outputs = result.outputs()?.iter().map(|o| o.scale(multiplier)).collect();
        let scaled_result = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![scaled.clone()]),
            result.risk_measures().to_vec(),
            outputs,
        )?;
        backtest.add_trade(*date, scaled.clone());
        backtest.add_results(*date, scaled_result);
    }
    backtest.book_trade(&scaled, scale_date, portfolio.final_date, &portfolio.transaction_cost)?;
    backtest.add_hedge(Hedge {
        trade: scaled,
        scale_date,
        scaling_factor,
        final_date: portfolio.final_date,
    });
    debug!(
        "Scaled {} by {:.6} on {}",
        portfolio.trade.display_name(),
        multiplier,
        scale_date
    );
    Ok(())
}

fn hedge_risk(portfolio: &ScalingPortfolio, date: NaiveDate) -> BacktestResult<f64> {
    let result = portfolio.results.get(&date).ok_or_else(|| {
        BacktestError::InsufficientData(format!(
            "{} was not valued on {}",
            portfolio.trade.display_name(),
            date
        ))
    })?;
    let value = result.by_measure(&portfolio.risk)?.aggregate(true)?;
    value.total().ok_or_else(|| {
        BacktestError::InvalidParameter(format!(
            "{} of {} is not numeric: {}",
            portfolio.risk,
            portfolio.trade.display_name(),
            value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{TradeDuration, TransactionCostModel};
    use crate::dates::HolidayCalendar;
    use crate::strategy::Strategy;
    use approx::assert_relative_eq;
    use mq_exec::api::memory::{leg_definition_datum, risk_datum};
    use mq_exec::InMemoryRiskApi;
    use mq_risk::RiskMeasure;
    use serde_json::Value;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, d).unwrap()
    }

    fn api() -> Arc<InMemoryRiskApi> {
        Arc::new(InMemoryRiskApi::new(|q| {
            if *q.measure == RiskMeasure::resolved_instrument() {
                return leg_definition_datum(q.instrument);
            }
            let notional = q.instrument.number("notional_amount").unwrap_or(1.0);
            let value = if q.measure.is_price() {
                notional * 0.01
            } else if q.instrument.instrument_type == "Swap" {
                notional * -0.5
            } else {
                notional * 0.2
            };
            risk_datum(value, "USD")
        }))
    }

    fn backtest() -> BackTest {
        BackTest::new(
            Strategy::default(),
            vec![date(1), date(2), date(3)],
            vec![RiskMeasure::price(), RiskMeasure::delta()],
            "USD",
        )
        .unwrap()
    }

    fn option() -> Instrument {
        Instrument::new("FX", "Option")
            .with_name("call")
            .with_property("notional_amount", 1000.0)
    }

    fn swap() -> Instrument {
        Instrument::new("Rates", "Swap").with_property("notional_amount", 100.0)
    }

    #[tokio::test]
    async fn test_add_trade_deferred_books_but_does_not_value() {
        let api = api();
        let factory = PricingFactory::new(api.clone(), "NYC");
        let mut cache = FinalDateCache::new(HolidayCalendar::weekends());
        let mut run = RunContext {
            factory: &factory,
            cache: &mut cache,
            mode: Valuation::Deferred,
        };
        let mut bt = backtest();
        let action = AddTradeAction::new(vec![option()])
            .with_trade_duration(TradeDuration::Tenor("1d".parse().unwrap()))
            .with_transaction_cost(TransactionCostModel::Constant { cost: 1.0 });

        AddTradeHandler::new(action)
            .apply_action(&[date(1)], &mut bt, &mut run)
            .await
            .unwrap();

        assert_eq!(bt.portfolio(date(1)).unwrap().instrument_names(), vec!["call_2021-12-01"]);
        assert_eq!(bt.portfolio(date(2)).unwrap().len(), 1);
        assert!(bt.portfolio(date(3)).is_none());
        assert!(bt.results(date(1)).is_empty());
        assert_eq!(bt.cash_payments()[&date(3)][0].effective_date, date(2));
        assert_eq!(api.submissions(), 1);
    }

    #[tokio::test]
    async fn test_add_trade_immediate_values() {
        let factory = PricingFactory::new(api(), "NYC");
        let mut cache = FinalDateCache::new(HolidayCalendar::weekends());
        let mut run = RunContext {
            factory: &factory,
            cache: &mut cache,
            mode: Valuation::Immediate,
        };
        let mut bt = backtest();

        AddTradeHandler::new(AddTradeAction::new(vec![option()]))
            .apply_action(&[date(2)], &mut bt, &mut run)
            .await
            .unwrap();

        assert!(bt.results(date(1)).is_empty());
        assert_relative_eq!(bt.risk_value(date(3), &RiskMeasure::price()).unwrap().unwrap(), 10.0);
        assert_eq!(bt.calc_calls, 1);
        assert_eq!(bt.calculations, 4);
    }

    #[tokio::test]
    async fn test_hedge_offsets_delta() {
        let factory = PricingFactory::new(api(), "NYC");
        let mut cache = FinalDateCache::new(HolidayCalendar::weekends());
        let mut bt = backtest();
        {
            let mut run = RunContext {
                factory: &factory,
                cache: &mut cache,
                mode: Valuation::Immediate,
            };
            AddTradeHandler::new(AddTradeAction::new(vec![option()]))
                .apply_action(&[date(1)], &mut bt, &mut run)
                .await
                .unwrap();
            HedgeHandler::new(HedgeAction::new(RiskMeasure::delta(), swap()).with_name("Hedge"))
                .apply_action(&[date(2)], &mut bt, &mut run)
                .await
                .unwrap();
        }

        // option delta 200 against swap delta -50 per 100 notional
        let hedge = &bt.hedges()[&date(2)][0];
        assert_relative_eq!(hedge.scaling_factor, -4.0);
        assert_eq!(hedge.trade.name.as_deref(), Some("Hedge_2021-12-02"));
        assert_relative_eq!(hedge.trade.number("notional_amount").unwrap(), 400.0);
        assert_relative_eq!(bt.risk_value(date(2), &RiskMeasure::delta()).unwrap().unwrap(), 0.0);
        assert_relative_eq!(bt.risk_value(date(3), &RiskMeasure::delta()).unwrap().unwrap(), 0.0);
        assert_relative_eq!(bt.risk_value(date(1), &RiskMeasure::delta()).unwrap().unwrap(), 200.0);
    }

    #[tokio::test]
    async fn test_hedge_without_exposure_is_skipped() {
        let factory = PricingFactory::new(api(), "NYC");
        let mut cache = FinalDateCache::new(HolidayCalendar::weekends());
        let mut run = RunContext {
            factory: &factory,
            cache: &mut cache,
            mode: Valuation::Immediate,
        };
        let mut bt = backtest();
        HedgeHandler::new(HedgeAction::new(RiskMeasure::delta(), swap()))
            .apply_action(&[date(1)], &mut bt, &mut run)
            .await
            .unwrap();
        assert!(bt.hedges().is_empty());
        assert!(bt.portfolio(date(1)).is_none());
    }

    #[tokio::test]
    async fn test_exit_closes_later_holdings() {
        let factory = PricingFactory::new(api(), "NYC");
        let mut cache = FinalDateCache::new(HolidayCalendar::weekends());
        let mut run = RunContext {
            factory: &factory,
            cache: &mut cache,
            mode: Valuation::Immediate,
        };
        let mut bt = backtest();
        AddTradeHandler::new(AddTradeAction::new(vec![option()]))
            .apply_action(&[date(1)], &mut bt, &mut run)
            .await
            .unwrap();
        ExitTradeHandler::new(ExitTradeAction::named(["call"]))
            .apply_action(&[date(2)], &mut bt, &mut run)
            .await
            .unwrap();

        assert_eq!(bt.portfolio(date(2)).unwrap().len(), 1);
        assert!(bt.portfolio(date(3)).unwrap().is_empty());
        assert_eq!(bt.risk_value(date(3), &RiskMeasure::price()).unwrap(), None);
        let close = &bt.cash_payments()[&date(3)][0];
        assert_eq!(close.effective_date, date(2));

        // nothing left to close
        ExitTradeHandler::new(ExitTradeAction::all())
            .apply_action(&[date(2)], &mut bt, &mut run)
            .await
            .unwrap();
        assert_eq!(bt.cash_payments()[&date(3)].len(), 1);
    }

    #[test]
    fn test_factory_context_carries_csa_term() {
        let api: Arc<dyn RiskApi> = Arc::new(InMemoryRiskApi::new(|_| Value::Null));
        let factory = PricingFactory::new(api, "LDN");
        let ctx = factory.context(date(1), Some("EUR-OIS"));
        assert_eq!(ctx.location(), "LDN");
        assert_eq!(ctx.pricing_date(), date(1));
    }
}
