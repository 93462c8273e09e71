//! Batching pricing context
//!
//! Outside a batch, every calculation is sent to the risk service at once
//! and the returned future is already resolved. Between [`PricingContext::enter`]
//! and the matching [`PricingContext::exit`], calculations are only
//! registered; the returned futures stay pending until the outermost exit
//! dispatches them.
//!
//! On dispatch, registrations are grouped so that positions sharing the same
//! scenario, measure set and date set share one wire request. Groups are
//! sent concurrently. A failed group resolves each of its futures with an
//! error value; nothing is raised to the caller.
//!
//! A context is driven by one task at a time (`&mut self`); contexts on
//! different tasks are independent.

use chrono::NaiveDate;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use mq_risk::{
    compose_all, decode_response, BatchScope, Instrument, Market, MarketKind,
    MultipleRiskMeasureResult, MultipleScenarioResult, Portfolio, PortfolioRiskResult, Priceable,
    PricingFuture, ResultInfo, RiskError, RiskKey, RiskMeasure, RiskOutput, RiskRequestParams,
    Scenario,
};

use crate::api::risk_api::{PricingDateAndMarket, RiskApi, RiskPosition, RiskRequest};
use crate::config::ServiceConfig;
use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CalcKey {
    instrument: String,
    measure: RiskMeasure,
    date: NaiveDate,
    scenario: Option<Scenario>,
}

struct Registration {
    instrument: Instrument,
    key: RiskKey,
    future: PricingFuture<ResultInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    scenario: Option<Scenario>,
    measures: Vec<RiskMeasure>,
    dates: Vec<NaiveDate>,
}

struct Group {
    key: GroupKey,
    positions: Vec<(String, Instrument)>,
}

/// Batching coordinator between calculation callers and the risk service
pub struct PricingContext {
    api: Arc<dyn RiskApi>,
    pricing_date: NaiveDate,
    location: String,
    market_kind: MarketKind,
    params: RiskRequestParams,
    scenario: Option<Scenario>,
    depth: usize,
    scope: BatchScope,
    pending: IndexMap<CalcKey, Registration>,
    requests_sent: usize,
    calculations_sent: usize,
}

impl PricingContext {
    /// Close-market context at NYC for `pricing_date`
    pub fn new(api: Arc<dyn RiskApi>, pricing_date: NaiveDate) -> Self {
        Self {
            api,
            pricing_date,
            location: "NYC".to_string(),
            market_kind: MarketKind::Close,
            params: RiskRequestParams::default(),
            scenario: None,
            depth: 0,
            scope: BatchScope::new(),
            pending: IndexMap::new(),
            requests_sent: 0,
            calculations_sent: 0,
        }
    }

    /// Context using the configured pricing defaults
    pub fn from_config(api: Arc<dyn RiskApi>, config: &ServiceConfig, pricing_date: NaiveDate) -> Self {
        let market_kind = match config.defaults.market_type.as_str() {
            "live" => MarketKind::Live,
            _ => MarketKind::Close,
        };
        Self::new(api, pricing_date)
            .with_location(config.defaults.location.clone())
            .with_market_kind(market_kind)
            .with_params(RiskRequestParams {
                csa_term: config.defaults.csa_term.clone(),
                ..RiskRequestParams::default()
            })
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_market_kind(mut self, market_kind: MarketKind) -> Self {
        self.market_kind = market_kind;
        self
    }

    pub fn with_params(mut self, params: RiskRequestParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = Some(scenario);
        self
    }

    /// Change the scenario applied to subsequent calculations
    pub fn set_scenario(&mut self, scenario: Option<Scenario>) {
        self.scenario = scenario;
    }

    /// Change the default pricing date of subsequent calculations
    pub fn set_pricing_date(&mut self, pricing_date: NaiveDate) {
        self.pricing_date = pricing_date;
    }

    pub fn pricing_date(&self) -> NaiveDate {
        self.pricing_date
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn provider(&self) -> &str {
        self.api.provider()
    }

    /// Whether a batch is open
    pub fn is_entered(&self) -> bool {
        self.depth > 0
    }

    /// Scope of the current (or last) batch
    pub fn scope(&self) -> &BatchScope {
        &self.scope
    }

    /// Wire requests sent so far
    pub fn requests_sent(&self) -> usize {
        self.requests_sent
    }

    /// (date, measure, position) cells requested so far
    pub fn calculations_sent(&self) -> usize {
        self.calculations_sent
    }

    /// Registrations waiting for dispatch
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Open a batch; nested calls only deepen it
    pub fn enter(&mut self) {
        if self.depth == 0 {
            self.scope = BatchScope::new();
            self.scope.enter();
            debug!("Entered batch pricing context at {}", self.pricing_date);
        }
        self.depth += 1;
    }

    /// Close a batch; the outermost exit dispatches every registration
    pub async fn exit(&mut self) -> ExecResult<()> {
        if self.depth == 0 {
            return Err(ExecError::InvalidState(
                "exit called on a pricing context that was not entered".to_string(),
            ));
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.scope.exit();
            self.dispatch().await;
        }
        Ok(())
    }

    /// Price `measure` on the context's pricing date
    pub async fn calc(&mut self, instrument: &Instrument, measure: &RiskMeasure) -> PricingFuture<ResultInfo> {
        let date = self.pricing_date;
        self.calc_at(instrument, measure, date).await
    }

    /// Price `measure` on `date`
    pub async fn calc_at(
        &mut self,
        instrument: &Instrument,
        measure: &RiskMeasure,
        date: NaiveDate,
    ) -> PricingFuture<ResultInfo> {
        let scenario = self.scenario.clone();
        let future = self.register(instrument, measure, date, scenario);
        self.flush_if_idle().await;
        future
    }

    /// Price `measure` on each of `dates`, composed into one historical result
    pub async fn calc_over(
        &mut self,
        instrument: &Instrument,
        measure: &RiskMeasure,
        dates: &[NaiveDate],
    ) -> PricingFuture<ResultInfo> {
        let future = self.register_dates(instrument, measure, dates);
        self.flush_if_idle().await;
        future
    }

    /// Price several measures on the pricing date
    pub async fn calc_many(
        &mut self,
        instrument: &Instrument,
        measures: &[RiskMeasure],
    ) -> PricingFuture<RiskOutput> {
        let dates = [self.pricing_date];
        let future = self.register_measures(instrument, measures, &dates);
        self.flush_if_idle().await;
        future
    }

    /// Price `measure` under each scenario on the pricing date
    pub async fn calc_scenarios(
        &mut self,
        instrument: &Instrument,
        measure: &RiskMeasure,
        scenarios: &[Scenario],
    ) -> PricingFuture<RiskOutput> {
        let date = self.pricing_date;
        let futures: Vec<PricingFuture<ResultInfo>> = scenarios
            .iter()
            .map(|s| self.register(instrument, measure, date, Some(s.clone())))
            .collect();
        self.flush_if_idle().await;

        let instrument = instrument.clone();
        let scenarios = scenarios.to_vec();
        PricingFuture::join_all(futures).then(move |values| {
            Ok(RiskOutput::Scenarios(MultipleScenarioResult::new(
                instrument,
                scenarios.into_iter().zip(values).collect(),
            )))
        })
    }

    /// Price a portfolio on the pricing date
    pub async fn calc_portfolio(
        &mut self,
        portfolio: &Portfolio,
        measures: &[RiskMeasure],
    ) -> ExecResult<PortfolioRiskResult> {
        let date = self.pricing_date;
        self.calc_portfolio_over(portfolio, measures, &[date]).await
    }

    /// Price a portfolio on `date`
    pub async fn calc_portfolio_at(
        &mut self,
        portfolio: &Portfolio,
        measures: &[RiskMeasure],
        date: NaiveDate,
    ) -> ExecResult<PortfolioRiskResult> {
        self.calc_portfolio_over(portfolio, measures, &[date]).await
    }

    /// Price a portfolio on each of `dates`
    ///
    /// Leaves hold a single result when one measure is requested, a
    /// [`MultipleRiskMeasureResult`] otherwise.
    pub async fn calc_portfolio_over(
        &mut self,
        portfolio: &Portfolio,
        measures: &[RiskMeasure],
        dates: &[NaiveDate],
    ) -> ExecResult<PortfolioRiskResult> {
        if measures.is_empty() || dates.is_empty() {
            return Err(ExecError::Risk(RiskError::InvalidArgument(
                "portfolio calculation needs at least one measure and one date".to_string(),
            )));
        }
        let futures = self.register_portfolio(portfolio, measures, dates);
        self.flush_if_idle().await;
        Ok(PortfolioRiskResult::new(portfolio.clone(), measures.to_vec(), futures)?)
    }

    /// Resolve an instrument's relative parameters on the pricing date
    pub async fn resolve(&mut self, instrument: &Instrument) -> PricingFuture<Instrument> {
        let date = self.pricing_date;
        self.resolve_at(instrument, date).await
    }

    /// Resolve an instrument's relative parameters as of `date`
    pub async fn resolve_at(&mut self, instrument: &Instrument, date: NaiveDate) -> PricingFuture<Instrument> {
        let future = self
            .calc_at(instrument, &RiskMeasure::resolved_instrument(), date)
            .await;
        let name = instrument.name.clone();
        future.then(move |result| {
            let mut resolved = result.as_instrument().cloned().ok_or_else(|| {
                RiskError::InvalidArgument(format!(
                    "could not resolve {}: {}",
                    name.as_deref().unwrap_or("instrument"),
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| result.kind().name().to_string())
                ))
            })?;
            if resolved.name.is_none() {
                resolved.name = name;
            }
            Ok(resolved)
        })
    }

    fn market_for(&self, date: NaiveDate) -> Market {
        match self.market_kind {
            MarketKind::Live => Market::live(self.location.clone()),
            _ => Market::close(self.location.clone(), Some(date)),
        }
    }

    fn key_for(&self, date: NaiveDate, measure: &RiskMeasure, scenario: Option<Scenario>) -> RiskKey {
        RiskKey::new(
            self.api.provider(),
            date,
            self.market_for(date),
            self.params.clone(),
            scenario,
            measure.clone(),
        )
    }

    fn register(
        &mut self,
        instrument: &Instrument,
        measure: &RiskMeasure,
        date: NaiveDate,
        scenario: Option<Scenario>,
    ) -> PricingFuture<ResultInfo> {
        let calc_key = CalcKey {
            instrument: instrument.identity_key(),
            measure: measure.clone(),
            date,
            scenario: scenario.clone(),
        };
        if let Some(existing) = self.pending.get(&calc_key) {
            return existing.future.clone();
        }

        let future = if self.depth > 0 {
            PricingFuture::in_scope(&self.scope)
        } else {
            PricingFuture::new()
        };
        let key = self.key_for(date, measure, scenario);
        self.pending.insert(
            calc_key,
            Registration {
                instrument: instrument.clone(),
                key,
                future: future.clone(),
            },
        );
        future
    }

    fn register_dates(
        &mut self,
        instrument: &Instrument,
        measure: &RiskMeasure,
        dates: &[NaiveDate],
    ) -> PricingFuture<ResultInfo> {
        let scenario = self.scenario.clone();
        let mut futures: Vec<PricingFuture<ResultInfo>> = dates
            .iter()
            .map(|d| self.register(instrument, measure, *d, scenario.clone()))
            .collect();
        if futures.len() == 1 {
            if let Some(only) = futures.pop() {
                return only;
            }
        }
        PricingFuture::join_all(futures).then(|values| compose_all(values.iter()))
    }

    fn register_measures(
        &mut self,
        instrument: &Instrument,
        measures: &[RiskMeasure],
        dates: &[NaiveDate],
    ) -> PricingFuture<RiskOutput> {
        let futures: Vec<PricingFuture<ResultInfo>> = measures
            .iter()
            .map(|m| self.register_dates(instrument, m, dates))
            .collect();

        let instrument = instrument.clone();
        let measures = measures.to_vec();
        PricingFuture::join_all(futures).then(move |values| {
            Ok(RiskOutput::Measures(MultipleRiskMeasureResult::from_results(
                instrument,
                measures.into_iter().zip(values),
            )))
        })
    }

    fn register_portfolio(
        &mut self,
        portfolio: &Portfolio,
        measures: &[RiskMeasure],
        dates: &[NaiveDate],
    ) -> Vec<PricingFuture<RiskOutput>> {
        portfolio
            .iter()
            .map(|priceable| match priceable {
                Priceable::Instrument(instrument) => match measures {
                    [measure] => self
                        .register_dates(instrument, measure, dates)
                        .then(|r| Ok(RiskOutput::Value(r))),
                    _ => self.register_measures(instrument, measures, dates),
                },
                Priceable::Portfolio(sub) => {
                    let futures = self.register_portfolio(sub, measures, dates);
                    match PortfolioRiskResult::new(sub.clone(), measures.to_vec(), futures) {
                        Ok(result) => PricingFuture::resolved(RiskOutput::Portfolio(result)),
                        Err(e) => PricingFuture::failed(e),
                    }
                }
            })
            .collect()
    }

    async fn flush_if_idle(&mut self) {
        if self.depth == 0 {
            self.dispatch().await;
        }
    }

    fn group_pending(&self) -> Vec<Group> {
        // (scenario, instrument) -> date -> measures
        let mut by_position: IndexMap<(Option<Scenario>, String), (Instrument, IndexMap<NaiveDate, BTreeSet<RiskMeasure>>)> =
            IndexMap::new();
        for (calc_key, registration) in &self.pending {
            let (_, dates) = by_position
                .entry((calc_key.scenario.clone(), calc_key.instrument.clone()))
                .or_insert_with(|| (registration.instrument.clone(), IndexMap::new()));
            dates
                .entry(calc_key.date)
                .or_default()
                .insert(calc_key.measure.clone());
        }

        let mut groups: IndexMap<GroupKey, Vec<(String, Instrument)>> = IndexMap::new();
        for ((scenario, id), (instrument, dates)) in by_position {
            let mut by_measures: IndexMap<Vec<RiskMeasure>, Vec<NaiveDate>> = IndexMap::new();
            for (date, measures) in dates {
                by_measures
                    .entry(measures.into_iter().collect())
                    .or_default()
                    .push(date);
            }
            for (measures, mut dates) in by_measures {
                dates.sort();
                groups
                    .entry(GroupKey {
                        scenario: scenario.clone(),
                        measures,
                        dates,
                    })
                    .or_default()
                    .push((id.clone(), instrument.clone()));
            }
        }

        groups
            .into_iter()
            .map(|(key, positions)| Group { key, positions })
            .collect()
    }

    fn request_for(&self, group: &Group) -> RiskRequest {
        RiskRequest {
            positions: group
                .positions
                .iter()
                .map(|(_, instrument)| RiskPosition {
                    instrument: instrument.clone(),
                    quantity: 1.0,
                })
                .collect(),
            measures: group.key.measures.clone(),
            pricing_and_market_data_as_of: group
                .key
                .dates
                .iter()
                .map(|d| PricingDateAndMarket {
                    pricing_date: *d,
                    market: self.market_for(*d),
                })
                .collect(),
            pricing_location: self.location.clone(),
            scenario: group.key.scenario.clone(),
            parameters: self.params.clone(),
            request_visible_to_gs: false,
            wait_for_results: true,
        }
    }

    async fn dispatch(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let groups = self.group_pending();
        let requests: Vec<(String, RiskRequest)> = groups
            .iter()
            .map(|g| (Uuid::new_v4().to_string(), self.request_for(g)))
            .collect();

        info!(
            "Dispatching {} calculations in {} requests to {}",
            self.pending.len(),
            requests.len(),
            self.api.provider()
        );

        let mut tasks = JoinSet::new();
        for (idx, (request_id, request)) in requests.iter().enumerate() {
            debug!(
                "Request {}: {} positions x {} measures x {} dates",
                request_id,
                request.positions.len(),
                request.measures.len(),
                request.pricing_and_market_data_as_of.len()
            );
            self.requests_sent += 1;
            self.calculations_sent += request.calculations();

            let api = Arc::clone(&self.api);
            let request = request.clone();
            tasks.spawn(async move { (idx, api.calc(&request).await) });
        }

        let mut outcomes: Vec<Option<ExecResult<serde_json::Value>>> =
            (0..requests.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => error!("Risk request task failed: {}", e),
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for ((group, (request_id, _)), outcome) in groups.iter().zip(&requests).zip(outcomes) {
            let decoded = match outcome {
                Some(Ok(payload)) => self.decode_group(group, &payload, request_id),
                Some(Err(e)) => Err(e),
                None => Err(ExecError::InvalidState(
                    "risk request task did not complete".to_string(),
                )),
            };

            match decoded {
                Ok(grid) => self.resolve_group(group, &pending, grid),
                Err(e) => {
                    error!("Risk request {} failed: {}", request_id, e);
                    self.fail_group(group, &pending, &e.to_string());
                }
            }
        }
    }

    fn decode_group(
        &self,
        group: &Group,
        payload: &serde_json::Value,
        request_id: &str,
    ) -> ExecResult<Vec<Vec<Vec<ResultInfo>>>> {
        let key = &group.key;
        let grid = decode_response(payload, group.positions.len(), Some(request_id), |di, mi| {
            match (key.dates.get(di), key.measures.get(mi)) {
                (Some(date), Some(measure)) => Ok(self.key_for(*date, measure, key.scenario.clone())),
                _ => Err(RiskError::MalformedPayload(format!(
                    "unexpected date {} or measure {} in response",
                    di, mi
                ))),
            }
        })?;

        if grid.len() != key.dates.len() || grid.iter().any(|m| m.len() != key.measures.len()) {
            return Err(ExecError::Risk(RiskError::MalformedPayload(format!(
                "expected {} dates x {} measures",
                key.dates.len(),
                key.measures.len()
            ))));
        }
        Ok(grid)
    }

    fn resolve_group(
        &self,
        group: &Group,
        pending: &IndexMap<CalcKey, Registration>,
        grid: Vec<Vec<Vec<ResultInfo>>>,
    ) {
        for (date, by_measure) in group.key.dates.iter().zip(grid) {
            for (measure, by_position) in group.key.measures.iter().zip(by_measure) {
                for ((id, _), result) in group.positions.iter().zip(by_position) {
                    let calc_key = CalcKey {
                        instrument: id.clone(),
                        measure: measure.clone(),
                        date: *date,
                        scenario: group.key.scenario.clone(),
                    };
                    if let Some(registration) = pending.get(&calc_key) {
                        registration.future.set_result(result);
                    }
                }
            }
        }
    }

    fn fail_group(&self, group: &Group, pending: &IndexMap<CalcKey, Registration>, message: &str) {
        for date in &group.key.dates {
            for measure in &group.key.measures {
                for (id, _) in &group.positions {
                    let calc_key = CalcKey {
                        instrument: id.clone(),
                        measure: measure.clone(),
                        date: *date,
                        scenario: group.key.scenario.clone(),
                    };
                    if let Some(registration) = pending.get(&calc_key) {
                        registration
                            .future
                            .set_result(ResultInfo::error_value(registration.key.clone(), message));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::{error_datum, risk_datum, InMemoryRiskApi};
    use approx::assert_relative_eq;
    use chrono::Datelike;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, d).unwrap()
    }

    fn option(name: &str) -> Instrument {
        Instrument::new("FX", "Option")
            .with_name(name)
            .with_property("notional_amount", 1e6)
    }

    fn context(api: Arc<InMemoryRiskApi>) -> PricingContext {
        PricingContext::new(api, date(1))
    }

    #[tokio::test]
    async fn test_unbatched_calc_is_resolved() {
        let api = Arc::new(InMemoryRiskApi::constant(42.0));
        let mut ctx = context(api.clone());

        let future = ctx.calc(&option("a"), &RiskMeasure::price()).await;
        assert!(future.done());
        let result = future.result().unwrap();
        assert_eq!(result.as_f64(), Some(42.0));
        assert_eq!(result.risk_key.date, Some(date(1)));
        assert_eq!(result.risk_key.provider.as_deref(), Some("marquee"));
        assert_eq!(api.submissions(), 1);
    }

    #[tokio::test]
    async fn test_batch_defers_and_groups() {
        let api = Arc::new(InMemoryRiskApi::constant(1.0));
        let mut ctx = context(api.clone());

        ctx.enter();
        let a = ctx.calc(&option("a"), &RiskMeasure::price()).await;
        let b = ctx.calc(&option("b"), &RiskMeasure::price()).await;
        let c = ctx.calc_many(&option("c"), &[RiskMeasure::price(), RiskMeasure::delta()]).await;

        assert!(!a.done());
        assert_eq!(a.result().unwrap_err(), RiskError::ResultUnderOpenContext);
        assert_eq!(api.submissions(), 0);
        assert_eq!(ctx.pending(), 4);

        ctx.exit().await.unwrap();

        // a and b share {Price}; c needs {Delta, Price}
        assert_eq!(ctx.requests_sent(), 2);
        assert_eq!(api.submissions(), 2);
        assert!(a.done() && b.done() && c.done());
        assert_eq!(c.result().unwrap().as_measures().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_identical_registrations_share_future() {
        let api = Arc::new(InMemoryRiskApi::constant(1.0));
        let mut ctx = context(api.clone());

        ctx.enter();
        let first = ctx.calc(&option("a"), &RiskMeasure::price()).await;
        let second = ctx.calc(&option("a"), &RiskMeasure::price()).await;
        assert_eq!(ctx.pending(), 1);
        ctx.exit().await.unwrap();

        assert_eq!(first.result().unwrap(), second.result().unwrap());
        assert_eq!(ctx.calculations_sent(), 1);
    }

    #[tokio::test]
    async fn test_nested_enter_dispatches_on_outermost_exit() {
        let api = Arc::new(InMemoryRiskApi::constant(1.0));
        let mut ctx = context(api.clone());

        ctx.enter();
        ctx.enter();
        let f = ctx.calc(&option("a"), &RiskMeasure::price()).await;
        ctx.exit().await.unwrap();
        assert!(!f.done());
        ctx.exit().await.unwrap();
        assert!(f.done());

        assert!(matches!(ctx.exit().await, Err(ExecError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_calc_over_composes_series() {
        let api = Arc::new(InMemoryRiskApi::new(|q| {
            risk_datum(100.0 + q.date.day() as f64, "USD")
        }));
        let mut ctx = context(api.clone());

        let series = ctx
            .calc_over(&option("a"), &RiskMeasure::price(), &[date(1), date(2), date(3)])
            .await
            .result()
            .unwrap();
        let values = series.as_series().unwrap();
        assert_eq!(values.len(), 3);
        assert_relative_eq!(values.values().sum::<f64>(), 306.0);
        assert_eq!(api.submissions(), 1);
    }

    #[tokio::test]
    async fn test_failed_request_resolves_error_values() {
        let api = Arc::new(
            InMemoryRiskApi::constant(1.0).with_failure(|r| {
                r.measures
                    .contains(&RiskMeasure::vega())
                    .then(|| "vega not available".to_string())
            }),
        );
        let mut ctx = context(api.clone());

        ctx.enter();
        let price = ctx.calc(&option("a"), &RiskMeasure::price()).await;
        let vega = ctx.calc(&option("b"), &RiskMeasure::vega()).await;
        ctx.exit().await.unwrap();

        assert_eq!(price.result().unwrap().as_f64(), Some(1.0));
        let failed = vega.result().unwrap();
        assert!(failed.is_error());
        assert!(failed.error.unwrap().contains("vega not available"));
    }

    #[tokio::test]
    async fn test_error_datum_stays_a_value() {
        let api = Arc::new(InMemoryRiskApi::new(|q| match q.instrument.name.as_deref() {
            Some("bad") => error_datum("Missing market data"),
            _ => risk_datum(10.0, "USD"),
        }));
        let mut ctx = context(api);

        let portfolio = Portfolio::from_instruments(vec![option("good"), option("bad")]);
        let result = ctx
            .calc_portfolio(&portfolio, &[RiskMeasure::price()])
            .await
            .unwrap();
        assert!(result.aggregate(false).is_err());
        let good = result.by_name("good").unwrap();
        assert_eq!(good.as_value().unwrap().as_f64(), Some(10.0));
    }

    #[tokio::test]
    async fn test_scenarios() {
        let api = Arc::new(InMemoryRiskApi::new(|q| {
            let bump = q.scenario.map(|s| s.name.len() as f64).unwrap_or(0.0);
            risk_datum(100.0 + bump, "USD")
        }));
        let mut ctx = context(api.clone());

        let up = Scenario::new("up", "CurveScenario");
        let down = Scenario::new("down!", "CurveScenario");
        let output = ctx
            .calc_scenarios(&option("a"), &RiskMeasure::price(), &[up.clone(), down.clone()])
            .await
            .result()
            .unwrap();
        let scenarios = output.as_scenarios().unwrap();
        assert_eq!(scenarios.get(&up).unwrap().as_f64(), Some(102.0));
        assert_eq!(scenarios.get(&down).unwrap().as_f64(), Some(105.0));
        // one request per scenario
        assert_eq!(api.submissions(), 2);
    }

    #[tokio::test]
    async fn test_resolve_instrument() {
        let api = Arc::new(InMemoryRiskApi::new(|q| {
            crate::api::memory::leg_definition_datum(&q.instrument.clone().with_property("strike_price", 1.15))
        }));
        let mut ctx = context(api);

        let resolved = ctx.resolve(&option("a")).await.result().unwrap();
        assert_eq!(resolved.number("strike_price"), Some(1.15));
        assert_eq!(resolved.number("notional_amount"), Some(1e6));
        assert_eq!(resolved.name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_nested_portfolio() {
        let api = Arc::new(InMemoryRiskApi::constant(5.0));
        let mut ctx = context(api.clone());

        let inner = Portfolio::from_instruments(vec![option("b"), option("c")]).with_name("inner");
        let mut outer = Portfolio::from_instruments(vec![option("a")]);
        outer.push(inner);

        ctx.enter();
        let result = ctx
            .calc_portfolio(&outer, &[RiskMeasure::price()])
            .await
            .unwrap();
        assert!(!result.done());
        ctx.exit().await.unwrap();

        assert_eq!(api.submissions(), 1);
        assert_eq!(result.aggregate(false).unwrap().as_f64(), Some(15.0));
    }
}
