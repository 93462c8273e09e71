//! Benchmarks for result composition and aggregation
//!
//! Run with: cargo bench

use chrono::{Duration, NaiveDate};
use mq_risk::*;

fn main() {
    println!("=== Result Composition Performance Benchmarks ===\n");

    benchmark_series_composition();
    benchmark_table_aggregation();
    benchmark_point_sorting();
}

fn key(date: NaiveDate, measure: RiskMeasure) -> RiskKey {
    RiskKey::new(
        "marquee",
        date,
        Market::close("NYC", Some(date)),
        RiskRequestParams::default(),
        None,
        measure,
    )
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default()
}

fn benchmark_series_composition() {
    println!("## Series Composition");

    let daily: Vec<ResultInfo> = (0..1000)
        .map(|i| {
            let date = start_date() + Duration::days(i);
            ResultInfo::float(key(date, RiskMeasure::price()), 100.0 + i as f64, Some("USD".to_string()))
        })
        .collect();

    let start = std::time::Instant::now();
    for _ in 0..10 {
        let _ = compose_all(daily.iter());
    }
    let elapsed = start.elapsed();
    println!("  compose_all over 1000 dates (10 iterations): {:?}", elapsed);
    println!("  Average: {:?}", elapsed / 10);

    println!();
}

fn bucketed(date: NaiveDate, offset: f64) -> ResultInfo {
    let tenors = ["3m", "6m", "1y", "2y", "5y", "10y", "30y"];
    let mut table = RiskTable::new(["mkt_type", "mkt_asset", "mkt_class", "mkt_point"]);
    for (i, tenor) in tenors.iter().enumerate() {
        for asset in ["USD", "EUR", "GBP"] {
            let _ = table.push_row(
                vec![
                    Cell::from("IR"),
                    Cell::from(asset),
                    Cell::from("SWAP"),
                    Cell::from(*tenor),
                ],
                offset + i as f64,
            );
        }
    }
    ResultInfo::table(key(date, RiskMeasure::delta()), table, Some("USD".to_string()))
}

fn benchmark_table_aggregation() {
    println!("## Table Aggregation");

    let legs: Vec<ResultInfo> = (0..200).map(|i| bucketed(start_date(), i as f64)).collect();

    let start = std::time::Instant::now();
    for _ in 0..10 {
        let _ = aggregate_risk(&legs, None);
    }
    let elapsed = start.elapsed();
    println!("  aggregate_risk over 200 legs (10 iterations): {:?}", elapsed);
    println!("  Average: {:?}", elapsed / 10);

    let start = std::time::Instant::now();
    for _ in 0..10 {
        let _ = aggregate_results(&legs, false);
    }
    let elapsed = start.elapsed();
    println!("  aggregate_results over 200 legs (10 iterations): {:?}", elapsed);

    println!();
}

fn benchmark_point_sorting() {
    println!("## Point Sort Order");

    let points = ["O/N", "1w", "3m", "1y", "2y6m", "10y", "30y", "Dec22", "CASH"];
    let start = std::time::Instant::now();
    let mut total = 0.0;
    for _ in 0..100_000 {
        for p in points {
            total += point_sort_order(p);
        }
    }
    let elapsed = start.elapsed();
    println!("  point_sort_order (900,000 calls): {:?} (checksum {})", elapsed, total);

    println!();
}
