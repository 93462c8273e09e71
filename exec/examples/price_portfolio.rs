//! Example: Batch pricing a portfolio
//!
//! This example demonstrates how to:
//! 1. Set up a pricing context over a risk service
//! 2. Register calculations inside a batch
//! 3. Dispatch them with one request per measure set
//! 4. Slice, aggregate and tabulate the results

use chrono::NaiveDate;
use mq_exec::{api::memory::risk_datum, InMemoryRiskApi, PricingContext};
use mq_risk::{DisplayOptions, Instrument, Portfolio, RiskMeasure, Tabular};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    mq_exec::init_tracing();

    println!("=== Batch Portfolio Pricing Example ===\n");

    // 1. Risk service: price proportional to notional
    let api = Arc::new(InMemoryRiskApi::new(|q| {
        let notional = q.instrument.number("notional_amount").unwrap_or(0.0);
        let value = if q.measure.is_price() {
            notional * 0.01
        } else {
            notional * 0.0004
        };
        risk_datum(value, "USD")
    }));
    let pricing_date = NaiveDate::from_ymd_opt(2021, 12, 1).ok_or("invalid date")?;
    let mut ctx = PricingContext::new(api.clone(), pricing_date);

    // 2. Portfolio of swaps
    let portfolio: Portfolio = [("5y", 5e7), ("10y", 1e8), ("30y", -2.5e7)]
        .into_iter()
        .map(|(tenor, notional)| {
            Instrument::new("Rates", "Swap")
                .with_name(format!("swap_{}", tenor))
                .with_property("termination_date", tenor)
                .with_property("notional_amount", notional)
        })
        .collect();

    // 3. Batch
    ctx.enter();
    let result = ctx
        .calc_portfolio(&portfolio, &[RiskMeasure::price(), RiskMeasure::delta()])
        .await?;
    println!("Pending before dispatch: {}", !result.done());
    ctx.exit().await?;
    println!(
        "Requests sent: {} ({} calculations)\n",
        ctx.requests_sent(),
        ctx.calculations_sent()
    );

    // 4. Results
    let price = result.by_measure(&RiskMeasure::price())?;
    println!("Aggregated price: {}", price.aggregate(false)?);

    if let Tabular::Pivot(table) = result.to_frame(&DisplayOptions::default())? {
        println!("Shape: {:?}", table.shape());
        for (row, values) in table.index.iter().zip(&table.values) {
            println!("  {:?}: {:?}", row, values);
        }
    }

    Ok(())
}
