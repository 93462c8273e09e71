//! In-memory risk service
//!
//! Prices every (date, measure, position) cell of a request with a
//! caller-supplied function and answers in the service's `$type` payload
//! format. Used by tests and demos; optionally behaves asynchronously,
//! handing out report ids that stay pending for a number of polls.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use mq_risk::{Instrument, RiskMeasure, Scenario};

use crate::api::risk_api::{PollResponse, RiskApi, RiskRequest, SubmitResponse};
use crate::error::{ExecError, ExecResult};

/// One cell to price
#[derive(Debug, Clone, Copy)]
pub struct PriceQuery<'a> {
    pub instrument: &'a Instrument,
    pub measure: &'a RiskMeasure,
    pub date: NaiveDate,
    pub scenario: Option<&'a Scenario>,
    pub location: &'a str,
}

type Pricer = Box<dyn Fn(&PriceQuery<'_>) -> Value + Send + Sync>;
type FailureRule = Box<dyn Fn(&RiskRequest) -> Option<String> + Send + Sync>;

struct PendingReport {
    polls_left: usize,
    results: Value,
}

/// Deterministic risk service backed by a pricing function
pub struct InMemoryRiskApi {
    provider: String,
    pricer: Pricer,
    failure: Option<FailureRule>,
    pending_polls: Option<usize>,
    poll_interval: Duration,
    reports: Mutex<HashMap<String, PendingReport>>,
    requests: Mutex<Vec<RiskRequest>>,
    submissions: AtomicUsize,
    polls: AtomicUsize,
}

impl InMemoryRiskApi {
    /// Service answering every cell with `pricer`
    pub fn new(pricer: impl Fn(&PriceQuery<'_>) -> Value + Send + Sync + 'static) -> Self {
        Self {
            provider: "marquee".to_string(),
            pricer: Box::new(pricer),
            failure: None,
            pending_polls: None,
            poll_interval: Duration::from_millis(1),
            reports: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            submissions: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    /// Service answering every cell with a USD `Risk` datum of `value`
    pub fn constant(value: f64) -> Self {
        Self::new(move |_| risk_datum(value, "USD"))
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Answer with report ids that stay pending for `polls` polls
    pub fn asynchronous(mut self, polls: usize) -> Self {
        self.pending_polls = Some(polls);
        self
    }

    /// Reject requests for which `rule` returns a message
    pub fn with_failure(
        mut self,
        rule: impl Fn(&RiskRequest) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.failure = Some(Box::new(rule));
        self
    }

    /// Number of requests received
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of polls received
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Requests received, in order
    pub fn requests(&self) -> Vec<RiskRequest> {
        self.requests.lock().clone()
    }

    fn price(&self, request: &RiskRequest) -> Value {
        let by_date: Vec<Value> = request
            .pricing_and_market_data_as_of
            .iter()
            .map(|as_of| {
                let by_measure: Vec<Value> = request
                    .measures
                    .iter()
                    .map(|measure| {
                        let by_position: Vec<Value> = request
                            .positions
                            .iter()
                            .map(|position| {
                                (self.pricer)(&PriceQuery {
                                    instrument: &position.instrument,
                                    measure,
                                    date: as_of.pricing_date,
                                    scenario: request.scenario.as_ref(),
                                    location: &request.pricing_location,
                                })
                            })
                            .collect();
                        Value::Array(by_position)
                    })
                    .collect();
                Value::Array(by_measure)
            })
            .collect();
        Value::Array(by_date)
    }
}

#[async_trait]
impl RiskApi for InMemoryRiskApi {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn submit(&self, request: &RiskRequest) -> ExecResult<SubmitResponse> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(message) = self.failure.as_ref().and_then(|rule| rule(request)) {
            return Err(ExecError::ServiceError {
                provider: self.provider.clone(),
                message,
                code: Some("500".to_string()),
            });
        }

        let results = self.price(request);
        match self.pending_polls {
            None => Ok(SubmitResponse::Results(results)),
            Some(polls_left) => {
                let report_id = Uuid::new_v4().to_string();
                debug!("Queued report {} for {} polls", report_id, polls_left);
                self.reports.lock().insert(
                    report_id.clone(),
                    PendingReport {
                        polls_left,
                        results,
                    },
                );
                Ok(SubmitResponse::Report { report_id })
            }
        }
    }

    async fn poll(&self, report_id: &str) -> ExecResult<PollResponse> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let mut reports = self.reports.lock();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| ExecError::ReportNotFound(report_id.to_string()))?;
        if report.polls_left > 0 {
            report.polls_left -= 1;
            return Ok(PollResponse::Pending);
        }
        let results = report.results.clone();
        reports.remove(report_id);
        Ok(PollResponse::Ready(results))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// `Risk` datum
pub fn risk_datum(value: f64, unit: &str) -> Value {
    json!({"$type": "Risk", "val": value, "unit": unit})
}

/// `Error` datum
pub fn error_datum(message: &str) -> Value {
    json!({"$type": "Error", "errorString": message})
}

/// `LegDefinition` datum carrying resolved fields
pub fn leg_definition_datum(instrument: &Instrument) -> Value {
    let mut fields = serde_json::Map::new();
    fields.insert("asset_class".to_string(), json!(instrument.asset_class));
    fields.insert("type".to_string(), json!(instrument.instrument_type));
    for (k, v) in &instrument.properties {
        fields.insert(k.clone(), v.clone());
    }
    json!({"$type": "LegDefinition", "fields": fields})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::risk_api::{PricingDateAndMarket, RiskPosition};
    use mq_risk::{Market, RiskRequestParams};

    fn request(positions: usize) -> RiskRequest {
        let date = NaiveDate::from_ymd_opt(2021, 12, 1).unwrap();
        RiskRequest {
            positions: (0..positions)
                .map(|i| RiskPosition {
                    instrument: Instrument::new("FX", "Option").with_name(format!("opt{}", i)),
                    quantity: 1.0,
                })
                .collect(),
            measures: vec![RiskMeasure::price(), RiskMeasure::delta()],
            pricing_and_market_data_as_of: vec![PricingDateAndMarket {
                pricing_date: date,
                market: Market::close("NYC", Some(date)),
            }],
            pricing_location: "NYC".to_string(),
            scenario: None,
            parameters: RiskRequestParams::default(),
            request_visible_to_gs: false,
            wait_for_results: true,
        }
    }

    #[tokio::test]
    async fn test_synchronous_shape() {
        let api = InMemoryRiskApi::constant(5.0);
        let results = api.calc(&request(3)).await.unwrap();
        let dates = results.as_array().unwrap();
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].as_array().unwrap().len(), 2);
        assert_eq!(dates[0][1].as_array().unwrap().len(), 3);
        assert_eq!(dates[0][1][2]["val"], json!(5.0));
        assert_eq!(api.submissions(), 1);
        assert_eq!(api.polls(), 0);
    }

    #[tokio::test]
    async fn test_asynchronous_polls_until_ready() {
        let api = InMemoryRiskApi::constant(1.0).asynchronous(2);
        let results = api.calc(&request(1)).await.unwrap();
        assert!(results.is_array());
        assert_eq!(api.polls(), 3);
    }

    #[tokio::test]
    async fn test_failure_rule() {
        let api = InMemoryRiskApi::constant(1.0)
            .with_failure(|r| (r.positions.len() > 1).then(|| "too many positions".to_string()));
        assert!(api.calc(&request(1)).await.is_ok());
        let err = api.calc(&request(2)).await.unwrap_err();
        assert!(matches!(err, ExecError::ServiceError { .. }));
        assert_eq!(api.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_report() {
        let api = InMemoryRiskApi::constant(1.0);
        assert!(matches!(api.poll("missing").await, Err(ExecError::ReportNotFound(_))));
    }
}
