//! Per-instrument result maps keyed by risk measure or scenario

use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::compose::{aggregate_results, compose, value_for_date, value_for_dates};
use crate::config::DisplayOptions;
use crate::error::{Result, RiskError};
use crate::measure::{risk_keys_compatible, RiskKey, RiskMeasure, Scenario};
use crate::priceable::{Instrument, Portfolio};
use crate::transform::Transformer;
use crate::value::ResultInfo;

use super::frame::Tabular;
use super::portfolio::PortfolioRiskResult;
use super::RiskOutput;

/// Results of one instrument under several scenarios
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleScenarioResult {
    instrument: Instrument,
    values: IndexMap<Scenario, ResultInfo>,
}

impl MultipleScenarioResult {
    pub fn new(instrument: Instrument, values: IndexMap<Scenario, ResultInfo>) -> Self {
        Self { instrument, values }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Scenario, &ResultInfo)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, scenario: &Scenario) -> Result<&ResultInfo> {
        self.values
            .get(scenario)
            .ok_or_else(|| RiskError::NotFound(format!("scenario {}", scenario)))
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        union_dates(self.values.values().flat_map(|r| r.dates()))
    }

    pub fn by_date(&self, date: NaiveDate) -> Result<Self> {
        self.map_values(|r| value_for_date(r, date))
    }

    pub fn by_dates(&self, dates: &[NaiveDate]) -> Result<Self> {
        self.map_values(|r| value_for_dates(r, dates))
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map_infallible(|r| r.scale(factor))
    }

    pub fn add_scalar(&self, amount: f64) -> Self {
        self.map_infallible(|r| r.add_scalar(amount))
    }

    pub fn transform(&self, transformer: &dyn Transformer) -> Result<Self> {
        self.map_values(|r| transformer.apply(r))
    }

    /// Merge scenario by scenario
    pub fn compose(&self, other: &Self) -> Result<Self> {
        let mut values = self.values.clone();
        for (scenario, r) in &other.values {
            let merged = match values.get(scenario) {
                Some(existing) => compose(existing, r)?,
                None => r.clone(),
            };
            values.insert(scenario.clone(), merged);
        }
        Ok(Self::new(self.instrument.clone(), values))
    }

    pub fn to_frame(&self, options: &DisplayOptions) -> Result<Tabular> {
        PortfolioRiskResult::single(self.instrument.clone(), RiskOutput::Scenarios(self.clone()))
            .to_frame(options)
    }

    fn map_values(&self, f: impl Fn(&ResultInfo) -> Result<ResultInfo>) -> Result<Self> {
        let values = self
            .values
            .iter()
            .map(|(s, r)| Ok((s.clone(), f(r)?)))
            .collect::<Result<_>>()?;
        Ok(Self::new(self.instrument.clone(), values))
    }

    fn map_infallible(&self, f: impl Fn(&ResultInfo) -> ResultInfo) -> Self {
        let values = self.values.iter().map(|(s, r)| (s.clone(), f(r))).collect();
        Self::new(self.instrument.clone(), values)
    }
}

/// Value held for one risk measure
#[derive(Debug, Clone, PartialEq)]
pub enum MeasureValue {
    Value(ResultInfo),
    Scenarios(MultipleScenarioResult),
}

impl MeasureValue {
    pub fn as_value(&self) -> Option<&ResultInfo> {
        match self {
            MeasureValue::Value(r) => Some(r),
            MeasureValue::Scenarios(_) => None,
        }
    }

    pub fn risk_key(&self) -> Option<&RiskKey> {
        match self {
            MeasureValue::Value(r) => Some(&r.risk_key),
            MeasureValue::Scenarios(s) => s.values.values().next().map(|r| &r.risk_key),
        }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        match self {
            MeasureValue::Value(r) => r.dates(),
            MeasureValue::Scenarios(s) => s.dates(),
        }
    }

    pub fn by_date(&self, date: NaiveDate) -> Result<Self> {
        Ok(match self {
            MeasureValue::Value(r) => MeasureValue::Value(value_for_date(r, date)?),
            MeasureValue::Scenarios(s) => MeasureValue::Scenarios(s.by_date(date)?),
        })
    }

    pub fn by_dates(&self, dates: &[NaiveDate]) -> Result<Self> {
        Ok(match self {
            MeasureValue::Value(r) => MeasureValue::Value(value_for_dates(r, dates)?),
            MeasureValue::Scenarios(s) => MeasureValue::Scenarios(s.by_dates(dates)?),
        })
    }

    pub fn scale(&self, factor: f64) -> Self {
        match self {
            MeasureValue::Value(r) => MeasureValue::Value(r.scale(factor)),
            MeasureValue::Scenarios(s) => MeasureValue::Scenarios(s.scale(factor)),
        }
    }

    pub fn add_scalar(&self, amount: f64) -> Self {
        match self {
            MeasureValue::Value(r) => MeasureValue::Value(r.add_scalar(amount)),
            MeasureValue::Scenarios(s) => MeasureValue::Scenarios(s.add_scalar(amount)),
        }
    }

    pub fn transform(&self, transformer: &dyn Transformer) -> Result<Self> {
        Ok(match self {
            MeasureValue::Value(r) => MeasureValue::Value(transformer.apply(r)?),
            MeasureValue::Scenarios(s) => MeasureValue::Scenarios(s.transform(transformer)?),
        })
    }

    pub fn compose(&self, other: &Self) -> Result<Self> {
        match (self, other) {
            (MeasureValue::Value(a), MeasureValue::Value(b)) => Ok(MeasureValue::Value(compose(a, b)?)),
            (MeasureValue::Scenarios(a), MeasureValue::Scenarios(b)) => {
                Ok(MeasureValue::Scenarios(a.compose(b)?))
            }
            _ => Err(RiskError::CannotCompose {
                lhs: self.kind_name(),
                rhs: other.kind_name(),
            }),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            MeasureValue::Value(r) => r.kind().name(),
            MeasureValue::Scenarios(_) => "MultipleScenarioResult",
        }
    }
}

/// Results of one instrument for several risk measures
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleRiskMeasureResult {
    instrument: Instrument,
    values: IndexMap<RiskMeasure, MeasureValue>,
}

impl MultipleRiskMeasureResult {
    pub fn new(instrument: Instrument, values: IndexMap<RiskMeasure, MeasureValue>) -> Self {
        Self { instrument, values }
    }

    /// Build from plain results, one per measure
    pub fn from_results(
        instrument: Instrument,
        results: impl IntoIterator<Item = (RiskMeasure, ResultInfo)>,
    ) -> Self {
        let values = results
            .into_iter()
            .map(|(m, r)| (m, MeasureValue::Value(r)))
            .collect();
        Self::new(instrument, values)
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn measures(&self) -> impl Iterator<Item = &RiskMeasure> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RiskMeasure, &MeasureValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, measure: &RiskMeasure) -> bool {
        self.values.contains_key(measure)
    }

    pub fn by_measure(&self, measure: &RiskMeasure) -> Result<&MeasureValue> {
        self.values
            .get(measure)
            .ok_or_else(|| RiskError::NotFound(format!("risk measure {}", measure)))
    }

    /// Plain result for a measure
    pub fn value(&self, measure: &RiskMeasure) -> Result<&ResultInfo> {
        self.by_measure(measure)?
            .as_value()
            .ok_or_else(|| RiskError::NotFound(format!("single result for {}", measure)))
    }

    pub fn by_measures(&self, measures: &[RiskMeasure]) -> Result<Self> {
        let values = measures
            .iter()
            .map(|m| Ok((m.clone(), self.by_measure(m)?.clone())))
            .collect::<Result<_>>()?;
        Ok(Self::new(self.instrument.clone(), values))
    }

    /// Every value sliced to `date`
    pub fn by_date(&self, date: NaiveDate) -> Result<Self> {
        self.map_values(|v| v.by_date(date))
    }

    pub fn by_dates(&self, dates: &[NaiveDate]) -> Result<Self> {
        self.map_values(|v| v.by_dates(dates))
    }

    /// Values computed under `scenario`
    pub fn by_scenario(&self, scenario: &Scenario) -> Result<Self> {
        let mut values = IndexMap::new();
        for (m, v) in &self.values {
            match v {
                MeasureValue::Scenarios(s) => {
                    values.insert(m.clone(), MeasureValue::Value(s.get(scenario)?.clone()));
                }
                MeasureValue::Value(r) if r.risk_key.scenario.as_ref() == Some(scenario) => {
                    values.insert(m.clone(), v.clone());
                }
                MeasureValue::Value(_) => {}
            }
        }
        if values.is_empty() {
            return Err(RiskError::NotFound(format!("scenario {}", scenario)));
        }
        Ok(Self::new(self.instrument.clone(), values))
    }

    /// Union of the dates indexing the values
    pub fn dates(&self) -> Vec<NaiveDate> {
        union_dates(self.values.values().flat_map(MeasureValue::dates))
    }

    /// Key of the first value
    pub fn risk_key(&self) -> Option<&RiskKey> {
        self.values.values().next().and_then(MeasureValue::risk_key)
    }

    /// Dates, falling back to the first value's pricing date
    pub(crate) fn dates_or_pricing_date(&self) -> Vec<Option<NaiveDate>> {
        let dates = self.dates();
        if dates.is_empty() {
            vec![self.risk_key().and_then(|k| k.date)]
        } else {
            dates.into_iter().map(Some).collect()
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        let values = self.values.iter().map(|(m, v)| (m.clone(), v.scale(factor))).collect();
        Self::new(self.instrument.clone(), values)
    }

    pub fn add_scalar(&self, amount: f64) -> Self {
        let values = self
            .values
            .iter()
            .map(|(m, v)| (m.clone(), v.add_scalar(amount)))
            .collect();
        Self::new(self.instrument.clone(), values)
    }

    pub fn transform(&self, transformer: &dyn Transformer) -> Result<Self> {
        self.map_values(|v| v.transform(transformer))
    }

    /// Combine with another result
    ///
    /// Same instrument: values are composed measure by measure. Different
    /// instruments: both become leaves of a two-instrument portfolio result.
    /// Fails if the results overlap on measures, instrument and dates, or
    /// were priced under incompatible keys.
    pub fn add(&self, other: &Self) -> Result<RiskOutput> {
        if let (Some(a), Some(b)) = (self.risk_key(), other.risk_key()) {
            if !risk_keys_compatible(a, b) {
                return Err(RiskError::IncompatibleRiskKeys);
            }
        }

        let instruments_equal = self.instrument == other.instrument;
        let self_dates = self.dates_or_pricing_date();
        let dates_overlap = other
            .dates_or_pricing_date()
            .iter()
            .any(|d| self_dates.contains(d));
        let measures_overlap = self.values.keys().any(|m| other.contains(m));
        if measures_overlap && instruments_equal && dates_overlap {
            return Err(RiskError::OverlappingResults);
        }

        if !instruments_equal {
            let mut measures: Vec<RiskMeasure> = self.values.keys().cloned().collect();
            measures.extend(other.values.keys().filter(|m| !self.contains(m)).cloned());
            let portfolio = Portfolio::from_instruments(vec![self.instrument.clone(), other.instrument.clone()]);
            return Ok(RiskOutput::Portfolio(PortfolioRiskResult::from_outputs(
                portfolio,
                measures,
                vec![RiskOutput::Measures(self.clone()), RiskOutput::Measures(other.clone())],
            )?));
        }

        Ok(RiskOutput::Measures(self.merge(other)?))
    }

    /// Compose measure by measure without overlap checks
    pub(crate) fn merge(&self, other: &Self) -> Result<Self> {
        let mut values = self.values.clone();
        for (m, v) in &other.values {
            let merged = match values.get(m) {
                Some(existing) => existing.compose(v)?,
                None => v.clone(),
            };
            values.insert(m.clone(), merged);
        }
        Ok(Self::new(self.instrument.clone(), values))
    }

    /// Sum several instruments' results measure by measure
    pub fn aggregate(
        results: &[&MultipleRiskMeasureResult],
        allow_mismatch_risk_keys: bool,
    ) -> Result<IndexMap<RiskMeasure, ResultInfo>> {
        let first = results
            .first()
            .ok_or_else(|| RiskError::InvalidArgument("no results to aggregate".to_string()))?;
        let mut out = IndexMap::new();
        for measure in first.measures() {
            let leaves = results
                .iter()
                .map(|r| r.value(measure).cloned())
                .collect::<Result<Vec<_>>>()?;
            out.insert(measure.clone(), aggregate_results(&leaves, allow_mismatch_risk_keys)?);
        }
        Ok(out)
    }

    pub fn to_frame(&self, options: &DisplayOptions) -> Result<Tabular> {
        PortfolioRiskResult::single(self.instrument.clone(), RiskOutput::Measures(self.clone()))
            .to_frame(options)
    }

    fn map_values(&self, f: impl Fn(&MeasureValue) -> Result<MeasureValue>) -> Result<Self> {
        let values = self
            .values
            .iter()
            .map(|(m, v)| Ok((m.clone(), f(v)?)))
            .collect::<Result<_>>()?;
        Ok(Self::new(self.instrument.clone(), values))
    }
}

pub(crate) fn union_dates(dates: impl Iterator<Item = NaiveDate>) -> Vec<NaiveDate> {
    let set: std::collections::BTreeSet<NaiveDate> = dates.collect();
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::Market;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, d).unwrap()
    }

    fn swap(name: &str) -> Instrument {
        Instrument::new("Rates", "Swap")
            .with_name(name)
            .with_property("notional_amount", 1e6)
    }

    fn key(d: u32, m: RiskMeasure) -> RiskKey {
        RiskKey {
            provider: Some("marquee".to_string()),
            date: Some(date(d)),
            market: Some(Market::close("NYC", None)),
            risk_measure: Some(m),
            ..Default::default()
        }
    }

    fn result(inst: &str, d: u32, price: f64, delta: f64) -> MultipleRiskMeasureResult {
        MultipleRiskMeasureResult::from_results(
            swap(inst),
            vec![
                (RiskMeasure::price(), ResultInfo::float(key(d, RiskMeasure::price()), price, None)),
                (RiskMeasure::delta(), ResultInfo::float(key(d, RiskMeasure::delta()), delta, None)),
            ],
        )
    }

    #[test]
    fn test_add_same_instrument_different_dates() {
        let sum = result("a", 1, 10.0, 1.0).add(&result("a", 2, 11.0, 2.0)).unwrap();
        let RiskOutput::Measures(m) = sum else { panic!("expected measures") };
        assert_eq!(m.dates(), vec![date(1), date(2)]);
        let price = m.value(&RiskMeasure::price()).unwrap();
        assert_eq!(price.as_series().unwrap()[&date(2)], 11.0);

        let day2 = m.by_date(date(2)).unwrap();
        assert_eq!(day2.value(&RiskMeasure::delta()).unwrap().as_f64(), Some(2.0));
    }

    #[test]
    fn test_add_overlapping_rejected() {
        let err = result("a", 1, 10.0, 1.0).add(&result("a", 1, 10.0, 1.0)).unwrap_err();
        assert_eq!(err, RiskError::OverlappingResults);
    }

    #[test]
    fn test_add_disjoint_measures_same_date() {
        let price = result("a", 1, 10.0, 1.0).by_measures(&[RiskMeasure::price()]).unwrap();
        let delta = result("a", 1, 10.0, 1.0).by_measures(&[RiskMeasure::delta()]).unwrap();
        let RiskOutput::Measures(m) = price.add(&delta).unwrap() else { panic!("expected measures") };
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_add_different_instruments_promotes() {
        let out = result("a", 1, 10.0, 1.0).add(&result("b", 1, 20.0, 2.0)).unwrap();
        let RiskOutput::Portfolio(p) = out else { panic!("expected portfolio") };
        assert_eq!(p.len(), 2);
        assert_eq!(p.portfolio().instrument_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_add_incompatible_keys() {
        let ldn = MultipleRiskMeasureResult::from_results(
            swap("a"),
            vec![(
                RiskMeasure::vega(),
                ResultInfo::float(
                    RiskKey { market: Some(Market::close("LDN", None)), ..key(2, RiskMeasure::vega()) },
                    1.0,
                    None,
                ),
            )],
        );
        assert_eq!(
            result("a", 1, 1.0, 1.0).add(&ldn).unwrap_err(),
            RiskError::IncompatibleRiskKeys
        );
    }

    #[test]
    fn test_scenarios() {
        let up = Scenario::new("up", "CurveScenario");
        let down = Scenario::new("down", "CurveScenario");
        let values = IndexMap::from([
            (up.clone(), ResultInfo::float(key(1, RiskMeasure::price()), 1.0, None)),
            (down.clone(), ResultInfo::float(key(1, RiskMeasure::price()), -1.0, None)),
        ]);
        let scen = MultipleScenarioResult::new(swap("a"), values);
        let mrm = MultipleRiskMeasureResult::new(
            swap("a"),
            IndexMap::from([(RiskMeasure::price(), MeasureValue::Scenarios(scen.clone()))]),
        );
        let only_up = mrm.by_scenario(&up).unwrap();
        assert_eq!(only_up.value(&RiskMeasure::price()).unwrap().as_f64(), Some(1.0));
        assert_eq!(scen.scale(2.0).get(&down).unwrap().as_f64(), Some(-2.0));
        assert!(mrm.by_scenario(&Scenario::new("flat", "CurveScenario")).is_err());
    }

    #[test]
    fn test_aggregate_measure_maps() {
        let a = result("a", 1, 10.0, 1.0);
        let b = result("b", 1, 20.0, 2.0);
        let agg = MultipleRiskMeasureResult::aggregate(&[&a, &b], false).unwrap();
        assert_eq!(agg[&RiskMeasure::price()].as_f64(), Some(30.0));
        assert_eq!(agg[&RiskMeasure::delta()].as_f64(), Some(3.0));
    }
}
