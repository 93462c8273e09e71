//! Mutable backtest state
//!
//! A [`BackTest`] is created once per run and mutated in place by the
//! action handlers while the engine walks the simulation dates. Once the run
//! finishes it is read through [`BackTest::result_summary`] and
//! [`BackTest::trade_ledger`].

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use mq_risk::{Instrument, Portfolio, PortfolioRiskResult, Priceable, RiskMeasure};

use crate::actions::{TradeDuration, TransactionCostModel};
use crate::dates::HolidayCalendar;
use crate::error::{BacktestError, BacktestResult};
use crate::strategy::Strategy;

/// Open or close of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentKind {
    Open,
    Close,
}

/// Cash exchanged when a trade is opened or closed
#[derive(Debug, Clone, PartialEq)]
pub struct CashPayment {
    pub trade: Instrument,

    /// Date the trade is valued at
    pub effective_date: NaiveDate,

    /// -1 when paying for the trade, +1 when receiving its value
    pub direction: f64,

    pub kind: PaymentKind,

    /// Cash amount, known once priced
    pub amount: Option<f64>,

    /// Cost charged alongside the payment
    pub transaction_cost: f64,
}

impl CashPayment {
    /// Payment for opening `trade` on `date`
    ///
    /// Instruments carrying a `premium` property settle it through their own
    /// price, so no opening cash changes hands.
    pub fn open(trade: Instrument, date: NaiveDate, transaction_cost: f64) -> Self {
        let amount = trade.property("premium").map(|_| 0.0);
        Self {
            trade,
            effective_date: date,
            direction: -1.0,
            kind: PaymentKind::Open,
            amount,
            transaction_cost,
        }
    }

    /// Payment for closing `trade` at its value on `date`
    pub fn close(trade: Instrument, date: NaiveDate, transaction_cost: f64) -> Self {
        Self {
            trade,
            effective_date: date,
            direction: 1.0,
            kind: PaymentKind::Close,
            amount: None,
            transaction_cost,
        }
    }

    pub fn trade_name(&self) -> &str {
        self.trade.display_name()
    }

    pub fn is_priced(&self) -> bool {
        self.amount.is_some()
    }
}

/// A hedge trade waiting for its size
///
/// The unscaled trade is valued on every date it is held; on the first of
/// those dates it is scaled so that its `risk` offsets the portfolio's.
#[derive(Debug, Clone)]
pub struct ScalingPortfolio {
    pub trade: Instrument,

    /// Simulation dates the hedge is held, the scale date first
    pub dates: Vec<NaiveDate>,

    pub risk: RiskMeasure,

    pub csa_term: Option<String>,

    pub scaling_parameter: String,

    pub final_date: NaiveDate,

    pub transaction_cost: TransactionCostModel,

    /// Unscaled results per held date
    pub results: BTreeMap<NaiveDate, PortfolioRiskResult>,
}

impl ScalingPortfolio {
    pub fn scale_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }
}

/// A scaled hedge that entered the portfolio
#[derive(Debug, Clone, PartialEq)]
pub struct Hedge {
    pub trade: Instrument,
    pub scale_date: NaiveDate,
    /// Portfolio risk over unscaled hedge risk; the hedge is held at minus this size
    pub scaling_factor: f64,
    pub final_date: NaiveDate,
}

/// Final dates of trades, memoized for one run
#[derive(Debug, Default)]
pub struct FinalDateCache {
    calendar: HolidayCalendar,
    entries: HashMap<(String, NaiveDate, Option<TradeDuration>), NaiveDate>,
}

impl FinalDateCache {
    pub fn new(calendar: HolidayCalendar) -> Self {
        Self {
            calendar,
            entries: HashMap::new(),
        }
    }

    pub fn calendar(&self) -> &HolidayCalendar {
        &self.calendar
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last date `trade`, created on `create_date`, is held
    ///
    /// Open-ended trades get `NaiveDate::MAX`.
    pub fn final_date(
        &mut self,
        trade: &Instrument,
        create_date: NaiveDate,
        duration: Option<&TradeDuration>,
    ) -> BacktestResult<NaiveDate> {
        let key = (trade.identity_key(), create_date, duration.cloned());
        if let Some(date) = self.entries.get(&key) {
            return Ok(*date);
        }

        let date = match duration {
            None => NaiveDate::MAX,
            Some(TradeDuration::Date(date)) => *date,
            Some(TradeDuration::Tenor(rule)) => rule.apply(create_date, &self.calendar)?,
            Some(TradeDuration::Attribute(attribute)) => match trade.date(attribute) {
                Some(date) => date,
                None => {
                    let rule = trade.text(attribute).and_then(|r| r.parse::<crate::dates::RelativeDateRule>().ok());
                    match rule {
                        Some(rule) => rule.apply(create_date, &self.calendar)?,
                        None => {
                            return Err(BacktestError::final_date(
                                trade.display_name(),
                                format!("property {} is neither a date nor a tenor", attribute),
                            ))
                        }
                    }
                }
            },
        };

        if date < create_date {
            return Err(BacktestError::final_date(
                trade.display_name(),
                format!("final date {} precedes trade date {}", date, create_date),
            ));
        }
        self.entries.insert(key, date);
        Ok(date)
    }
}

/// State of one backtest run
#[derive(Debug)]
pub struct BackTest {
    strategy: Strategy,
    states: Vec<NaiveDate>,
    risks: Vec<RiskMeasure>,
    cash_currency: String,
    pub(crate) portfolio_dict: BTreeMap<NaiveDate, Portfolio>,
    pub(crate) scaling_portfolios: BTreeMap<NaiveDate, Vec<ScalingPortfolio>>,
    pub(crate) cash_payments: BTreeMap<NaiveDate, Vec<CashPayment>>,
    pub(crate) results: BTreeMap<NaiveDate, Vec<PortfolioRiskResult>>,
    pub(crate) hedges: BTreeMap<NaiveDate, Vec<Hedge>>,
    pub(crate) cash_dict: BTreeMap<NaiveDate, f64>,
    pub calc_calls: usize,
    pub calculations: usize,
}

impl BackTest {
    /// Empty state over `states`, which are sorted and deduplicated
    pub fn new(
        strategy: Strategy,
        mut states: Vec<NaiveDate>,
        risks: Vec<RiskMeasure>,
        cash_currency: impl Into<String>,
    ) -> BacktestResult<Self> {
        states.sort();
        states.dedup();
        if states.is_empty() {
            return Err(BacktestError::InsufficientData(
                "a backtest needs at least one simulation date".to_string(),
            ));
        }
        if risks.is_empty() {
            return Err(BacktestError::InvalidParameter(
                "a backtest needs at least one risk measure".to_string(),
            ));
        }
        Ok(Self {
            strategy,
            states,
            risks,
            cash_currency: cash_currency.into(),
            portfolio_dict: BTreeMap::new(),
            scaling_portfolios: BTreeMap::new(),
            cash_payments: BTreeMap::new(),
            results: BTreeMap::new(),
            hedges: BTreeMap::new(),
            cash_dict: BTreeMap::new(),
            calc_calls: 0,
            calculations: 0,
        })
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn states(&self) -> &[NaiveDate] {
        &self.states
    }

    pub fn risks(&self) -> &[RiskMeasure] {
        &self.risks
    }

    pub fn cash_currency(&self) -> &str {
        &self.cash_currency
    }

    pub fn portfolio_dict(&self) -> &BTreeMap<NaiveDate, Portfolio> {
        &self.portfolio_dict
    }

    /// Trades held on `date`
    pub fn portfolio(&self, date: NaiveDate) -> Option<&Portfolio> {
        self.portfolio_dict.get(&date)
    }

    pub fn scaling_portfolios(&self) -> &BTreeMap<NaiveDate, Vec<ScalingPortfolio>> {
        &self.scaling_portfolios
    }

    pub fn cash_payments(&self) -> &BTreeMap<NaiveDate, Vec<CashPayment>> {
        &self.cash_payments
    }

    pub fn hedges(&self) -> &BTreeMap<NaiveDate, Vec<Hedge>> {
        &self.hedges
    }

    /// Results computed for `date`
    pub fn results(&self, date: NaiveDate) -> &[PortfolioRiskResult] {
        self.results.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cumulative cash per simulation date
    pub fn cash_dict(&self) -> &BTreeMap<NaiveDate, f64> {
        &self.cash_dict
    }

    /// Transaction costs charged per date
    pub fn transaction_costs(&self) -> BTreeMap<NaiveDate, f64> {
        let mut costs = BTreeMap::new();
        for (date, payments) in &self.cash_payments {
            let total: f64 = payments.iter().map(|p| p.transaction_cost).sum();
            if total != 0.0 {
                costs.insert(*date, total);
            }
        }
        costs
    }

    /// Simulation dates in `[from, to]`
    pub fn states_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        self.states
            .iter()
            .copied()
            .filter(|s| *s >= from && *s <= to)
            .collect()
    }

    pub fn next_state_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.states.iter().copied().find(|s| *s > date)
    }

    pub fn add_trade(&mut self, date: NaiveDate, trade: impl Into<Priceable>) {
        self.portfolio_dict.entry(date).or_default().push(trade);
    }

    pub fn add_results(&mut self, date: NaiveDate, results: PortfolioRiskResult) {
        self.results.entry(date).or_default().push(results);
    }

    pub fn add_cash_payment(&mut self, booking_date: NaiveDate, payment: CashPayment) {
        self.cash_payments.entry(booking_date).or_default().push(payment);
    }

    pub fn add_scaling_portfolio(&mut self, portfolio: ScalingPortfolio) {
        if let Some(date) = portfolio.scale_date() {
            self.scaling_portfolios.entry(date).or_default().push(portfolio);
        }
    }

    pub fn add_hedge(&mut self, hedge: Hedge) {
        self.hedges.entry(hedge.scale_date).or_default().push(hedge);
    }

    /// Count one calculation call covering `instruments x measures x dates`
    pub fn record_calculation(&mut self, instruments: usize, measures: usize, dates: usize) {
        self.calc_calls += 1;
        self.calculations += instruments * measures * dates;
    }

    /// Book the cash and costs of holding `trade` from `create_date` to `final_date`
    ///
    /// The closing payment is valued on the final date and credited on the
    /// next simulation date; trades still held after the last date stay open.
    pub fn book_trade(
        &mut self,
        trade: &Instrument,
        create_date: NaiveDate,
        final_date: NaiveDate,
        cost_model: &TransactionCostModel,
    ) -> BacktestResult<()> {
        let cost = cost_model.cost(trade)?;
        self.add_cash_payment(create_date, CashPayment::open(trade.clone(), create_date, cost));
        if let Some(booking) = self.next_state_after(final_date) {
            self.add_cash_payment(booking, CashPayment::close(trade.clone(), final_date, cost));
        }
        Ok(())
    }

    /// Close `closed` after `date`
    ///
    /// They are dropped from later portfolios and results, their scheduled
    /// closing payments are cancelled and a new one, valued on `date`, is
    /// booked on the next simulation date with the cost charged on entry.
    pub fn close_trades_after(&mut self, date: NaiveDate, closed: &[Instrument]) {
        let names: Vec<&str> = closed.iter().map(Instrument::display_name).collect();
        let is_closed = |i: &Instrument| names.contains(&i.display_name());

        for (d, portfolio) in self.portfolio_dict.iter_mut() {
            if *d > date {
                *portfolio = portfolio.retain_instruments(|i| !is_closed(i));
            }
        }
        for (d, results) in self.results.iter_mut() {
            if *d > date {
                *results = results
                    .iter()
                    .map(|r| r.retain_instruments(|i| !is_closed(i)))
                    .filter(|r| !r.is_empty())
                    .collect();
            }
        }
        let mut entry_costs = HashMap::new();
        for payments in self.cash_payments.values_mut() {
            for p in payments.iter().filter(|p| p.kind == PaymentKind::Open && is_closed(&p.trade)) {
                entry_costs.insert(p.trade_name().to_string(), p.transaction_cost);
            }
            payments.retain(|p| !(p.kind == PaymentKind::Close && is_closed(&p.trade)));
        }

        if let Some(booking) = self.next_state_after(date) {
            for trade in closed {
                let cost = entry_costs.get(trade.display_name()).copied().unwrap_or(0.0);
                self.add_cash_payment(booking, CashPayment::close(trade.clone(), date, cost));
            }
        }
    }

    /// Aggregated value of `measure` over everything held on `date`
    pub fn risk_value(&self, date: NaiveDate, measure: &RiskMeasure) -> BacktestResult<Option<f64>> {
        let mut total = None;
        for result in self.results(date) {
            if result.is_empty() || !result.risk_measures().contains(measure) {
                continue;
            }
            let value = result.by_measure(measure)?.aggregate(true)?;
            let number = value.total().ok_or_else(|| {
                BacktestError::InvalidParameter(format!(
                    "{} on {} is not numeric: {}",
                    measure, date, value
                ))
            })?;
            total = Some(total.unwrap_or(0.0) + number);
        }
        Ok(total)
    }

    /// Running cash balance per simulation date
    pub(crate) fn settle_cash(&mut self) {
        let mut balance = 0.0;
        let mut cash_dict = BTreeMap::new();
        for state in &self.states {
            for payment in self.cash_payments.get(state).into_iter().flatten() {
                match payment.amount {
                    Some(amount) => balance += amount,
                    None => warn!(
                        "No {:?} cash for {} on {}, counting it as zero",
                        payment.kind,
                        payment.trade_name(),
                        state
                    ),
                }
            }
            cash_dict.insert(*state, balance);
        }
        self.cash_dict = cash_dict;
    }
}
