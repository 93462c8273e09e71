//! Integration tests for result decoding, composition and containers
//!
//! These tests decode a recorded service response for a three-swap
//! portfolio and exercise slicing, aggregation and export on it.

use chrono::NaiveDate;
use mq_risk::{
    Cell, DisplayOptions, Instrument, Market, MultipleRiskMeasureResult, Portfolio,
    PortfolioRiskResult, PricingFuture, ResultInfo, ResultWithInfoAggregator, RiskConfig,
    RiskError, RiskKey, RiskMeasure, RiskOutput, RiskRequestParams, Transformer,
};
use std::fs;

fn pricing_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 3, 1).unwrap()
}

fn swap(name: &str, notional: f64) -> Instrument {
    Instrument::new("Rates", "Swap")
        .with_name(name)
        .with_property("notional_amount", notional)
        .with_property("termination_date", "10y")
}

fn measures() -> Vec<RiskMeasure> {
    vec![RiskMeasure::price(), RiskMeasure::delta()]
}

fn load_portfolio_result() -> PortfolioRiskResult {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/swap_delta_response.json");
    let raw = fs::read_to_string(path).expect("Failed to read response fixture");
    let payload: serde_json::Value = serde_json::from_str(&raw).expect("Invalid fixture JSON");

    let instruments = vec![swap("a", 1e6), swap("b", -5e5), swap("c", 2e6)];
    let decoded = mq_risk::decode_response(&payload, instruments.len(), Some("req-1"), |_, mi| {
        Ok(RiskKey::new(
            "marquee",
            pricing_date(),
            Market::close("NYC", Some(pricing_date())),
            RiskRequestParams::default(),
            None,
            measures()[mi].clone(),
        ))
    })
    .expect("Failed to decode response");

    let by_measure = &decoded[0];
    let outputs = instruments
        .iter()
        .enumerate()
        .map(|(pos, inst)| {
            RiskOutput::Measures(MultipleRiskMeasureResult::from_results(
                inst.clone(),
                measures()
                    .into_iter()
                    .enumerate()
                    .map(|(mi, m)| (m, by_measure[mi][pos].clone())),
            ))
        })
        .collect();

    PortfolioRiskResult::from_outputs(Portfolio::from_instruments(instruments), measures(), outputs).unwrap()
}

#[test]
fn test_aggregate_refuses_failed_leg() {
    let result = load_portfolio_result();
    let price = result.by_measure(&RiskMeasure::price()).unwrap();
    let err = price.aggregate(false).unwrap_err();
    assert!(matches!(err, RiskError::ErrorInAggregation(msg) if msg.contains("EURIBOR")));
}

#[test]
fn test_aggregate_without_failed_leg() {
    let result = load_portfolio_result().retain_instruments(|i| i.name.as_deref() != Some("c"));

    let price = result.by_measure(&RiskMeasure::price()).unwrap().aggregate(false).unwrap();
    assert_eq!(price.as_f64(), Some(6125.25));
    assert_eq!(price.unit.as_deref(), Some("USD"));

    let delta = result.by_measure(&RiskMeasure::delta()).unwrap().aggregate(false).unwrap();
    let table = delta.as_table().unwrap();
    let points: Vec<String> = table
        .rows()
        .iter()
        .map(|r| table.cell(r, "mkt_point").unwrap().to_string())
        .collect();
    assert_eq!(points, vec!["3m", "1y", "5y", "10y"]);
    assert_eq!(table.rows()[2].value, 60.0);

    let summed = ResultWithInfoAggregator::new()
        .with_coordinate("mkt_point", "5y")
        .apply(&delta)
        .unwrap();
    assert_eq!(summed.as_f64(), Some(60.0));
}

#[test]
fn test_price_frame_shows_errors() {
    let result = load_portfolio_result();
    let frame = result
        .by_measure(&RiskMeasure::price())
        .unwrap()
        .to_frame(&DisplayOptions::default())
        .unwrap();
    let pivot = frame.as_pivot().unwrap();
    assert_eq!(pivot.get(&["a"], &["Price"]), Some(&Cell::Number(10250.5)));
    assert_eq!(
        pivot.get(&["c"], &["Price"]),
        Some(&Cell::text("Missing curve EUR-EURIBOR-TELERATE"))
    );
}

#[test]
fn test_delta_frame_with_configured_na() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/display.yaml");
    let config = RiskConfig::from_yaml(&fs::read_to_string(path).unwrap()).unwrap();

    let result = load_portfolio_result();
    let delta = result.by_measure(&RiskMeasure::delta()).unwrap();

    let shown = delta.to_frame(&config.display).unwrap();
    let long = shown.as_long().expect("bucketed results stay long");
    assert_eq!(long.len(), 6);

    let hidden = delta.to_frame(&DisplayOptions::default()).unwrap();
    assert_eq!(hidden.as_long().unwrap().len(), 5);
}

#[test]
fn test_request_id_kept() {
    let result = load_portfolio_result();
    let a = result.by_name("a").unwrap();
    let price = a.as_measures().unwrap().value(&RiskMeasure::price()).unwrap();
    assert_eq!(price.request_id.as_deref(), Some("req-1"));
}

#[test]
fn test_historical_results_compose_through_futures() {
    let key = |d: u32| RiskKey {
        date: NaiveDate::from_ymd_opt(2022, 3, d),
        risk_measure: Some(RiskMeasure::price()),
        ..Default::default()
    };
    let days: Vec<PricingFuture<ResultInfo>> = (1..=3).map(|_| PricingFuture::new()).collect();
    let series = PricingFuture::join_all(days.clone()).then(|values| mq_risk::compose_all(values.iter()));

    for (i, f) in days.iter().enumerate() {
        assert!(!series.done());
        f.set_result(ResultInfo::float(key(i as u32 + 1), 100.0 + i as f64, None));
    }

    let composed = series.result().unwrap();
    let s = composed.as_series().unwrap();
    assert_eq!(s.len(), 3);
    assert_eq!(s.values().sum::<f64>(), 303.0);
}
