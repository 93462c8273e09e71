//! Example: Backtesting a delta-hedged FX option strategy
//!
//! This example demonstrates how to:
//! 1. Define a strategy from triggers and actions
//! 2. Run it on a business-day grid against a risk service
//! 3. Read the per-date summary and the trade ledger

use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use mq_backtests::{
    AddTradeAction, BacktestConfig, ExitTradeAction, Frequency, GenericEngine, HedgeAction,
    Strategy, TradeDuration, TransactionCostModel, Trigger, TriggerDirection, TriggerRequirements,
};
use mq_exec::api::memory::{leg_definition_datum, risk_datum};
use mq_exec::InMemoryRiskApi;
use mq_risk::{Instrument, RiskMeasure};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    mq_backtests::init_tracing();

    println!("=== FX Option Backtest Example ===\n");

    // 1. Risk service: option value drifts with the day of the month
    let api = Arc::new(InMemoryRiskApi::new(|q| {
        if *q.measure == RiskMeasure::resolved_instrument() {
            return leg_definition_datum(q.instrument);
        }
        let notional = q.instrument.number("notional_amount").unwrap_or(0.0);
        let drift = 1.0 + f64::from(q.date.day()) / 100.0;
        let value = match (q.instrument.instrument_type.as_str(), q.measure.is_price()) {
            ("Option", true) => notional * 0.02 * drift,
            ("Option", false) => notional * 0.45 * drift,
            (_, true) => 0.0,
            (_, false) => notional,
        };
        risk_datum(value, "USD")
    }));

    // 2. Strategy: buy a one-month call every week, hedge its delta daily,
    //    close everything if the portfolio is worth more than 2,000
    let call = Instrument::new("FX", "Option")
        .with_name("call")
        .with_property("pair", "EURUSD")
        .with_property("option_type", "Call")
        .with_property("strike_price", "ATMF")
        .with_property("notional_amount", 1e5)
        .with_property("premium", 0.0);
    let forward = Instrument::new("FX", "Forward")
        .with_name("fwd")
        .with_property("pair", "EURUSD")
        .with_property("notional_amount", 1.0);

    let strategy = Strategy::default()
        .with_trigger(Trigger::new(
            TriggerRequirements::periodic("1w".parse()?),
            vec![AddTradeAction::new(vec![call])
                .with_name("Vol")
                .with_trade_duration(TradeDuration::Tenor("1m".parse()?))
                .with_transaction_cost(TransactionCostModel::Constant { cost: 5.0 })
                .into()],
        ))
        .with_trigger(Trigger::new(
            TriggerRequirements::periodic("1b".parse()?),
            vec![HedgeAction::new(RiskMeasure::delta(), forward)
                .with_name("DeltaHedge")
                .with_trade_duration(TradeDuration::Tenor("1b".parse()?))
                .into()],
        ))
        .with_trigger(Trigger::new(
            TriggerRequirements::StrategyRisk {
                risk: RiskMeasure::price(),
                direction: TriggerDirection::Above,
                level: 2_000.0,
            },
            vec![ExitTradeAction::all().into()],
        ));
    println!("Strategy:\n{}\n", strategy.to_yaml()?);

    // 3. Run
    let engine = GenericEngine::new(api.clone()).with_config(
        BacktestConfig::default()
            .with_frequency(Frequency::BusinessDaily)
            .with_risks(vec![RiskMeasure::price(), RiskMeasure::delta()]),
    );
    let start = NaiveDate::from_ymd_opt(2021, 11, 1).ok_or_else(|| anyhow::anyhow!("invalid date"))?;
    let end = NaiveDate::from_ymd_opt(2021, 11, 30).ok_or_else(|| anyhow::anyhow!("invalid date"))?;
    let backtest = engine.run_backtest(&strategy, start, end).await?;
    println!(
        "Service requests: {}, calculation calls: {}, calculations: {}\n",
        api.submissions(),
        backtest.calc_calls,
        backtest.calculations
    );

    // 4. Summary
    let summary = backtest.result_summary()?;
    println!("{}", summary.columns().join(" | "));
    for row in summary.rows() {
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        println!("{}", cells.join(" | "));
    }

    // 5. Ledger
    let ledger = backtest.trade_ledger()?;
    println!("\n{} trades booked", ledger.len());
    for row in ledger.rows().iter().take(5) {
        let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
        println!("{}", cells.join(" | "));
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
