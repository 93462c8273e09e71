//! Risk calculation service trait and wire types
//!
//! The service exposes two operations: `submit` a request and `poll` a
//! report until its results are ready. Synchronous requests
//! (`waitForResults`) are answered directly by `submit`.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use mq_risk::{Instrument, Market, RiskMeasure, RiskRequestParams, Scenario};

use crate::error::{ExecError, ExecResult};

/// One priceable in a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPosition {
    pub instrument: Instrument,
    pub quantity: f64,
}

/// A pricing date and the market to price against on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingDateAndMarket {
    pub pricing_date: NaiveDate,
    pub market: Market,
}

/// Risk calculation request
///
/// The response is indexed `[date][measure][position]` in the order given
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRequest {
    pub positions: Vec<RiskPosition>,
    pub measures: Vec<RiskMeasure>,
    pub pricing_and_market_data_as_of: Vec<PricingDateAndMarket>,
    pub pricing_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<Scenario>,
    pub parameters: RiskRequestParams,
    pub request_visible_to_gs: bool,
    pub wait_for_results: bool,
}

impl RiskRequest {
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.pricing_and_market_data_as_of
            .iter()
            .map(|d| d.pricing_date)
            .collect()
    }

    /// Number of (date, measure, position) cells the response will hold
    pub fn calculations(&self) -> usize {
        self.positions.len() * self.measures.len() * self.pricing_and_market_data_as_of.len()
    }
}

/// Answer to a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmitResponse {
    /// Asynchronous: poll this report
    Report {
        #[serde(rename = "reportId")]
        report_id: String,
    },
    /// Synchronous: the results themselves
    Results(Value),
}

/// Answer to a poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    Pending,
    Ready(Value),
    Failed(String),
}

/// Risk calculation service
///
/// Implementations provide `submit` and `poll`; waiting for reports is
/// shared.
#[async_trait]
pub trait RiskApi: Send + Sync {
    /// Provider identifier recorded in result keys
    fn provider(&self) -> &str;

    /// Submit a request
    ///
    /// # Returns
    /// * `Ok(SubmitResponse::Report)` - Calculation accepted, poll for results
    /// * `Ok(SubmitResponse::Results)` - Results returned inline
    /// * `Err(ExecError)` - Submission failed
    async fn submit(&self, request: &RiskRequest) -> ExecResult<SubmitResponse>;

    /// Query a report
    async fn poll(&self, report_id: &str) -> ExecResult<PollResponse>;

    /// Delay between polls of a pending report
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Overall limit on waiting for one report
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Submit a request and wait for its results
    async fn calc(&self, request: &RiskRequest) -> ExecResult<Value> {
        match self.submit(request).await? {
            SubmitResponse::Results(results) => Ok(results),
            SubmitResponse::Report { report_id } => {
                let mut results = self.get_results(&[report_id]).await?;
                results
                    .pop()
                    .ok_or_else(|| ExecError::InvalidResponse("no results for report".to_string()))
            }
        }
    }

    /// Wait for several reports, polling the pending ones every
    /// `poll_interval` until all are ready
    async fn get_results(&self, report_ids: &[String]) -> ExecResult<Vec<Value>> {
        let started = Instant::now();
        let mut results: Vec<Option<Value>> = vec![None; report_ids.len()];

        loop {
            for (idx, report_id) in report_ids.iter().enumerate() {
                if results[idx].is_some() {
                    continue;
                }
                match self.poll(report_id).await? {
                    PollResponse::Ready(value) => {
                        debug!("Report {} ready", report_id);
                        results[idx] = Some(value);
                    }
                    PollResponse::Failed(message) => {
                        return Err(ExecError::ServiceError {
                            provider: self.provider().to_string(),
                            message: format!("Report {} failed: {}", report_id, message),
                            code: None,
                        });
                    }
                    PollResponse::Pending => {}
                }
            }

            if results.iter().all(Option::is_some) {
                return Ok(results.into_iter().flatten().collect());
            }

            if let Some(timeout) = self.timeout() {
                if started.elapsed() >= timeout {
                    warn!("Gave up waiting for reports {:?}", report_ids);
                    return Err(ExecError::Timeout(format!(
                        "reports {:?} pending after {:?}",
                        report_ids, timeout
                    )));
                }
            }

            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}
