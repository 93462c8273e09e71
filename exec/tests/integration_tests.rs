//! Integration tests for PricingContext against an HTTP risk service

use chrono::NaiveDate;
use mq_exec::{
    api::{PollResponse, RiskApi},
    ExecError, HttpRiskApi, PricingContext, RateLimiterConfig, ServiceConfig,
};
use mq_risk::{Instrument, Portfolio, RiskMeasure};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pricing_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 12, 1).unwrap()
}

fn config(server: &MockServer) -> ServiceConfig {
    ServiceConfig::new("marquee", server.uri())
        .with_poll_interval(Duration::from_millis(10))
        .with_rate_limit(RateLimiterConfig::new(100, 200))
}

fn swap(name: &str) -> Instrument {
    Instrument::new("Rates", "Swap")
        .with_name(name)
        .with_property("notional_amount", 1e8)
}

#[tokio::test]
async fn test_batch_submits_once_and_polls_report() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/risk/calculate"))
        .and(body_partial_json(json!({"pricingLocation": "NYC"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reportId": "report-1"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/risk/calculate/report-1/results"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/risk/calculate/report-1/results"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[[
            {"$type": "Risk", "val": 1500.0, "unit": "USD"},
            {"$type": "Risk", "val": -250.0, "unit": "USD"}
        ]]])))
        .mount(&server)
        .await;

    let api = Arc::new(HttpRiskApi::new(config(&server)).unwrap());
    let mut ctx = PricingContext::new(api, pricing_date());

    ctx.enter();
    let a = ctx.calc(&swap("a"), &RiskMeasure::price()).await;
    let b = ctx.calc(&swap("b"), &RiskMeasure::price()).await;
    assert!(!a.done());
    ctx.exit().await.unwrap();

    assert_eq!(a.result().unwrap().as_f64(), Some(1500.0));
    assert_eq!(b.result().unwrap().as_f64(), Some(-250.0));
    assert!(a.result().unwrap().request_id.is_some());
    assert_eq!(ctx.requests_sent(), 1);
}

#[tokio::test]
async fn test_service_failure_becomes_error_values() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/risk/calculate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("calculation cluster unavailable"))
        .mount(&server)
        .await;

    let api = Arc::new(HttpRiskApi::new(config(&server)).unwrap());
    let mut ctx = PricingContext::new(api, pricing_date());

    let portfolio = Portfolio::from_instruments(vec![swap("a"), swap("b")]);
    let result = ctx
        .calc_portfolio(&portfolio, &[RiskMeasure::price()])
        .await
        .unwrap();

    for output in result.outputs().unwrap() {
        let value = output.as_value().unwrap();
        assert!(value.is_error());
        assert!(value.error.as_deref().unwrap().contains("unavailable"));
    }
}

#[tokio::test]
async fn test_bearer_token_used() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "secret-token"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/risk/calculate"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[[
            {"$type": "Risk", "val": 7.0, "unit": "USD"}
        ]]])))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config(&server).with_credentials("client", "secret");
    config.auth_endpoint = Some(format!("{}/oauth/token", server.uri()));
    let api = Arc::new(HttpRiskApi::new(config).unwrap());
    let mut ctx = PricingContext::new(api, pricing_date());

    let first = ctx.calc(&swap("a"), &RiskMeasure::price()).await;
    let second = ctx.calc(&swap("b"), &RiskMeasure::price()).await;
    assert_eq!(first.result().unwrap().as_f64(), Some(7.0));
    assert_eq!(second.result().unwrap().as_f64(), Some(7.0));
}

#[tokio::test]
async fn test_poll_statuses() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/risk/calculate/missing/results"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/risk/calculate/broken/results"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "Error", "errorString": "bad trade"})),
        )
        .mount(&server)
        .await;

    let api = HttpRiskApi::new(config(&server)).unwrap();
    assert!(matches!(api.poll("missing").await, Err(ExecError::ReportNotFound(_))));
    assert_eq!(
        api.poll("broken").await.unwrap(),
        PollResponse::Failed("bad trade".to_string())
    );
}

#[tokio::test]
async fn test_timeout_while_pending() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/risk/calculate/slow/results"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Running"})))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.timeout_secs = Some(0);
    let api = HttpRiskApi::new(config).unwrap();

    let err = api.get_results(&["slow".to_string()]).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, ExecError::Timeout(_)));
}
