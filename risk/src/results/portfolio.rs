//! Results of a (possibly nested) portfolio
//!
//! A [`PortfolioRiskResult`] holds one future per top-level priceable of its
//! portfolio. Slicing by measure, scenario or date maps the futures lazily;
//! lookups by path, instrument or name and aggregation wait for them.

use chrono::NaiveDate;
use indexmap::IndexMap;

use crate::compose::aggregate_results;
use crate::config::DisplayOptions;
use crate::error::{Result, RiskError};
use crate::future::PricingFuture;
use crate::measure::{risk_keys_compatible, RiskKey, RiskMeasure, Scenario};
use crate::priceable::{Instrument, Portfolio, PortfolioPath, Priceable};
use crate::transform::Transformer;
use crate::value::{Cell, ResultInfo, ResultValue, DATE_COLUMN};

use super::frame::{
    DataFrame, PivotRule, Tabular, DATES, INSTRUMENT_NAME, PORTFOLIO_NAME_PREFIX, RISK_MEASURE,
    SCENARIO, VALUE,
};
use super::measures::{union_dates, MeasureValue};
use super::RiskOutput;

/// An instrument leaf of a resolved portfolio result
#[derive(Debug, Clone)]
pub struct Leaf {
    pub path: PortfolioPath,
    /// Names of the enclosing sub-portfolios, outermost first
    pub portfolio_names: Vec<String>,
    pub instrument: Instrument,
    pub output: RiskOutput,
}

/// Deferred results for every priceable of a portfolio
#[derive(Debug, Clone)]
pub struct PortfolioRiskResult {
    portfolio: Portfolio,
    risk_measures: Vec<RiskMeasure>,
    futures: Vec<PricingFuture<RiskOutput>>,
}

impl PortfolioRiskResult {
    /// One future per top-level priceable, in portfolio order
    pub fn new(
        portfolio: Portfolio,
        risk_measures: Vec<RiskMeasure>,
        futures: Vec<PricingFuture<RiskOutput>>,
    ) -> Result<Self> {
        if futures.len() != portfolio.len() {
            return Err(RiskError::InvalidArgument(format!(
                "{} futures for {} priceables",
                futures.len(),
                portfolio.len()
            )));
        }
        Ok(Self {
            portfolio,
            risk_measures,
            futures,
        })
    }

    /// Portfolio result over already computed outputs
    pub fn from_outputs(
        portfolio: Portfolio,
        risk_measures: Vec<RiskMeasure>,
        outputs: Vec<RiskOutput>,
    ) -> Result<Self> {
        let futures = outputs.into_iter().map(PricingFuture::resolved).collect();
        Self::new(portfolio, risk_measures, futures)
    }

    /// One-instrument wrapper around a leaf output
    pub(crate) fn single(instrument: Instrument, output: RiskOutput) -> Self {
        let risk_measures = match &output {
            RiskOutput::Measures(m) => m.measures().cloned().collect(),
            RiskOutput::Value(r) => r.risk_key.risk_measure.iter().cloned().collect(),
            RiskOutput::Scenarios(s) => s
                .iter()
                .next()
                .and_then(|(_, r)| r.risk_key.risk_measure.clone())
                .into_iter()
                .collect(),
            RiskOutput::Portfolio(p) => p.risk_measures.clone(),
        };
        Self {
            portfolio: Portfolio::from_instruments(vec![instrument]),
            risk_measures,
            futures: vec![PricingFuture::resolved(output)],
        }
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn risk_measures(&self) -> &[RiskMeasure] {
        &self.risk_measures
    }

    pub fn futures(&self) -> &[PricingFuture<RiskOutput>] {
        &self.futures
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Whether every leaf future has completed
    pub fn done(&self) -> bool {
        self.futures.iter().all(PricingFuture::done)
    }

    /// Future completing with this result once every leaf has completed
    pub fn as_future(&self) -> PricingFuture<PortfolioRiskResult> {
        let portfolio = self.portfolio.clone();
        let measures = self.risk_measures.clone();
        PricingFuture::join_all(self.futures.clone())
            .then(move |outputs| PortfolioRiskResult::from_outputs(portfolio, measures, outputs))
    }

    /// Wait for every top-level output
    pub fn outputs(&self) -> Result<Vec<RiskOutput>> {
        self.futures.iter().map(PricingFuture::result).collect()
    }

    fn map_outputs<F>(&self, risk_measures: Vec<RiskMeasure>, f: F) -> Self
    where
        F: Fn(&RiskOutput) -> Result<RiskOutput> + Clone + Send + 'static,
    {
        let futures = self
            .futures
            .iter()
            .map(|fut| {
                let f = f.clone();
                fut.then(move |output| f(&output))
            })
            .collect();
        Self {
            portfolio: self.portfolio.clone(),
            risk_measures,
            futures,
        }
    }

    /// Restrict to one measure
    pub fn by_measure(&self, measure: &RiskMeasure) -> Result<Self> {
        if !self.risk_measures.contains(measure) {
            return Err(RiskError::NotFound(format!("risk measure {}", measure)));
        }
        let m = measure.clone();
        Ok(self.map_outputs(vec![measure.clone()], move |o| o.by_measure(&m)))
    }

    /// Restrict to several measures
    pub fn by_measures(&self, measures: &[RiskMeasure]) -> Result<Self> {
        if let Some(missing) = measures.iter().find(|m| !self.risk_measures.contains(m)) {
            return Err(RiskError::NotFound(format!("risk measure {}", missing)));
        }
        let ms = measures.to_vec();
        Ok(self.map_outputs(measures.to_vec(), move |o| match o {
            RiskOutput::Measures(m) => Ok(RiskOutput::Measures(m.by_measures(&ms)?)),
            RiskOutput::Portfolio(p) => Ok(RiskOutput::Portfolio(p.by_measures(&ms)?)),
            other => match ms.as_slice() {
                [single] => other.by_measure(single),
                _ => Ok(other.clone()),
            },
        }))
    }

    pub fn by_scenario(&self, scenario: &Scenario) -> Self {
        let s = scenario.clone();
        self.map_outputs(self.risk_measures.clone(), move |o| o.by_scenario(&s))
    }

    pub fn by_date(&self, date: NaiveDate) -> Self {
        self.map_outputs(self.risk_measures.clone(), move |o| o.by_date(date))
    }

    pub fn by_dates(&self, dates: &[NaiveDate]) -> Self {
        let ds = dates.to_vec();
        self.map_outputs(self.risk_measures.clone(), move |o| o.by_dates(&ds))
    }

    pub fn scale(&self, factor: f64) -> Self {
        self.map_outputs(self.risk_measures.clone(), move |o| Ok(o.scale(factor)))
    }

    pub fn add_scalar(&self, amount: f64) -> Self {
        self.map_outputs(self.risk_measures.clone(), move |o| Ok(o.add_scalar(amount)))
    }

    pub fn transform(&self, transformer: &dyn Transformer) -> Result<Self> {
        let outputs = self
            .outputs()?
            .iter()
            .map(|o| o.transform(transformer))
            .collect::<Result<Vec<_>>>()?;
        Self::from_outputs(self.portfolio.clone(), self.risk_measures.clone(), outputs)
    }

    /// Keep the top-level instruments accepted by `keep`; sub-portfolios stay
    pub fn retain_instruments(&self, keep: impl Fn(&Instrument) -> bool) -> Self {
        let mut priceables = Vec::new();
        let mut futures = Vec::new();
        for (p, f) in self.portfolio.priceables.iter().zip(&self.futures) {
            let kept = match p {
                Priceable::Instrument(i) => keep(i),
                Priceable::Portfolio(_) => true,
            };
            if kept {
                priceables.push(p.clone());
                futures.push(f.clone());
            }
        }
        Self {
            portfolio: Portfolio {
                name: self.portfolio.name.clone(),
                priceables,
            },
            risk_measures: self.risk_measures.clone(),
            futures,
        }
    }

    /// Output at a path into the (nested) portfolio
    pub fn by_path(&self, path: &PortfolioPath) -> Result<RiskOutput> {
        let (head, rest) = path
            .split_first()
            .ok_or_else(|| RiskError::InvalidArgument("empty portfolio path".to_string()))?;
        let output = self
            .futures
            .get(head)
            .ok_or_else(|| RiskError::NotFound(format!("path index {}", head)))?
            .result()?;
        if rest.is_empty() {
            return Ok(output);
        }
        match output {
            RiskOutput::Portfolio(p) => p.by_path(&rest),
            _ => Err(RiskError::NotFound(format!("{:?} does not lead to a sub-portfolio", path))),
        }
    }

    /// Output of the first occurrence of `instrument`
    pub fn by_instrument(&self, instrument: &Instrument) -> Result<RiskOutput> {
        let path = self
            .portfolio
            .paths(instrument)
            .into_iter()
            .next()
            .ok_or_else(|| RiskError::NotFound(format!("instrument {}", instrument)))?;
        self.by_path(&path)
    }

    /// Output of the first instrument named `name`
    pub fn by_name(&self, name: &str) -> Result<RiskOutput> {
        let path = self
            .portfolio
            .paths_by_name(name)
            .into_iter()
            .next()
            .ok_or_else(|| RiskError::NotFound(format!("instrument {}", name)))?;
        self.by_path(&path)
    }

    /// Every instrument leaf, depth first
    pub fn leaves(&self) -> Result<Vec<Leaf>> {
        let mut out = Vec::new();
        self.collect_leaves(&[], &[], &mut out)?;
        Ok(out)
    }

    fn collect_leaves(&self, prefix: &[usize], names: &[String], out: &mut Vec<Leaf>) -> Result<()> {
        for (idx, (priceable, fut)) in self.portfolio.priceables.iter().zip(&self.futures).enumerate() {
            let path: Vec<usize> = prefix.iter().copied().chain([idx]).collect();
            match (priceable, fut.result()?) {
                (Priceable::Instrument(i), output) => out.push(Leaf {
                    path: PortfolioPath::new(path),
                    portfolio_names: names.to_vec(),
                    instrument: i.clone(),
                    output,
                }),
                (Priceable::Portfolio(sub), RiskOutput::Portfolio(p)) => {
                    let mut nested = names.to_vec();
                    nested.push(sub.name.clone().unwrap_or_else(|| format!("Portfolio_{}", idx)));
                    p.collect_leaves(&path, &nested, out)?;
                }
                (Priceable::Portfolio(_), other) => {
                    return Err(RiskError::InvalidArgument(format!(
                        "sub-portfolio resolved to {}",
                        other.kind_name()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Union of the dates of every output
    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        let mut all = Vec::new();
        for o in self.outputs()? {
            all.extend(o.dates()?);
        }
        Ok(union_dates(all.into_iter()))
    }

    /// Key of the first output carrying one
    pub fn first_risk_key(&self) -> Result<Option<RiskKey>> {
        for o in self.outputs()? {
            if let Some(key) = o.risk_key()? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    fn dates_or_pricing_date(&self) -> Result<Vec<Option<NaiveDate>>> {
        let dates = self.dates()?;
        Ok(if dates.is_empty() {
            vec![self.first_risk_key()?.and_then(|k| k.date)]
        } else {
            dates.into_iter().map(Some).collect()
        })
    }

    /// Sum every leaf for the single requested measure
    ///
    /// Sub-portfolios are aggregated first. Use
    /// [`PortfolioRiskResult::aggregate_by_measure`] for several measures.
    pub fn aggregate(&self, allow_mismatch_risk_keys: bool) -> Result<ResultInfo> {
        let measure = match self.risk_measures.as_slice() {
            [] => None,
            [single] => Some(single),
            _ => {
                return Err(RiskError::InvalidArgument(
                    "more than one risk measure; aggregate by measure".to_string(),
                ))
            }
        };

        let mut leaves = Vec::with_capacity(self.len());
        for output in self.outputs()? {
            let value = match &output {
                RiskOutput::Value(r) => r.clone(),
                RiskOutput::Measures(m) => match measure {
                    Some(measure) => m.value(measure)?.clone(),
                    None => m
                        .iter()
                        .next()
                        .and_then(|(_, v)| v.as_value().cloned())
                        .ok_or_else(|| RiskError::NotFound("leaf value".to_string()))?,
                },
                RiskOutput::Portfolio(p) => p.aggregate(allow_mismatch_risk_keys)?,
                RiskOutput::Scenarios(_) => {
                    return Err(RiskError::InvalidArgument(
                        "scenario results must be sliced by scenario before aggregation".to_string(),
                    ))
                }
            };
            leaves.push(value);
        }
        aggregate_results(&leaves, allow_mismatch_risk_keys)
    }

    /// [`PortfolioRiskResult::aggregate`] for each requested measure
    pub fn aggregate_by_measure(
        &self,
        allow_mismatch_risk_keys: bool,
    ) -> Result<IndexMap<RiskMeasure, ResultInfo>> {
        self.risk_measures
            .iter()
            .map(|m| Ok((m.clone(), self.by_measure(m)?.aggregate(allow_mismatch_risk_keys)?)))
            .collect()
    }

    /// Combine with another portfolio result over the union portfolio
    ///
    /// Fails if both cover a common measure, instrument and date, or were
    /// priced under incompatible keys.
    pub fn add(&self, other: &Self) -> Result<Self> {
        if let (Some(a), Some(b)) = (self.first_risk_key()?, other.first_risk_key()?) {
            if !risk_keys_compatible(&a, &b) {
                return Err(RiskError::IncompatibleRiskKeys);
            }
        }

        let self_dates = self.dates_or_pricing_date()?;
        let dates_overlap = other
            .dates_or_pricing_date()?
            .iter()
            .any(|d| self_dates.contains(d));
        let measures_overlap = self.risk_measures.iter().any(|m| other.risk_measures.contains(m));
        let other_instruments = other.portfolio.all_instruments();
        let instruments_overlap = self
            .portfolio
            .all_instruments()
            .iter()
            .any(|i| other_instruments.contains(i));
        if measures_overlap && dates_overlap && instruments_overlap {
            return Err(RiskError::OverlappingResults);
        }

        self.merge(other)
    }

    fn merge(&self, other: &Self) -> Result<Self> {
        let union = self.portfolio.union(&other.portfolio);
        let mut measures = self.risk_measures.clone();
        measures.extend(
            other
                .risk_measures
                .iter()
                .filter(|m| !self.risk_measures.contains(m))
                .cloned(),
        );

        let lhs_default = single_measure(&self.risk_measures);
        let rhs_default = single_measure(&other.risk_measures);
        let position = |p: &Portfolio, priceable: &Priceable| p.priceables.iter().position(|x| x == priceable);

        let mut outputs = Vec::with_capacity(union.len());
        for priceable in union.iter() {
            let lhs = position(&self.portfolio, priceable).map(|i| self.futures[i].result()).transpose()?;
            let rhs = position(&other.portfolio, priceable).map(|i| other.futures[i].result()).transpose()?;
            let output = match (priceable, lhs, rhs) {
                (Priceable::Instrument(inst), Some(a), Some(b)) => RiskOutput::Measures(
                    a.to_measures(inst, lhs_default)?
                        .merge(&b.to_measures(inst, rhs_default)?)?,
                ),
                (Priceable::Portfolio(_), Some(RiskOutput::Portfolio(a)), Some(RiskOutput::Portfolio(b))) => {
                    RiskOutput::Portfolio(a.merge(&b)?)
                }
                (_, Some(a), None) => a,
                (_, None, Some(b)) => b,
                _ => {
                    return Err(RiskError::InvalidArgument(
                        "cannot merge mismatched portfolio results".to_string(),
                    ))
                }
            };
            outputs.push(output);
        }
        Self::from_outputs(union, measures, outputs)
    }

    /// Tabular view of every leaf
    ///
    /// Bucketed results come back in long form indexed on the risk measure
    /// (and dates). Otherwise the frame is pivoted per [`PivotRule`].
    pub fn to_frame(&self, options: &DisplayOptions) -> Result<Tabular> {
        let default_measure = single_measure(&self.risk_measures);
        let mut entries = Vec::new();
        for leaf in self.leaves()? {
            collect_entries(&leaf, default_measure, &mut entries)?;
        }

        let depth = entries.iter().map(|e| e.portfolio_names.len()).max().unwrap_or(0);
        let has_dates = entries.iter().any(|e| match &e.result.value {
            ResultValue::Series(_) => true,
            ResultValue::Table(t) => t.has_column(DATE_COLUMN),
            _ => false,
        });
        let multi_scenarios = entries.iter().any(|e| e.scenario.is_some());
        let mut measures: Vec<&RiskMeasure> = Vec::new();
        for m in entries.iter().filter_map(|e| e.measure.as_ref()) {
            if !measures.contains(&m) {
                measures.push(m);
            }
        }
        let multi_measures = measures.len() > 1;

        let mut dims: Vec<String> = Vec::new();
        for e in &entries {
            if let ResultValue::Table(t) = &e.result.value {
                for c in t.columns() {
                    if c != DATE_COLUMN && !dims.contains(c) {
                        dims.push(c.clone());
                    }
                }
            }
        }

        let mut names: Vec<String> = (0..depth).map(|i| format!("{}{}", PORTFOLIO_NAME_PREFIX, i)).collect();
        names.push(INSTRUMENT_NAME.to_string());

        let mut columns = names.clone();
        columns.push(RISK_MEASURE.to_string());
        if multi_scenarios {
            columns.push(SCENARIO.to_string());
        }
        if has_dates {
            columns.push(DATES.to_string());
        }
        columns.extend(dims.iter().cloned());
        columns.push(VALUE.to_string());

        let mut frame = DataFrame::new(columns);
        for e in &entries {
            let mut head: Vec<Cell> = (0..depth)
                .map(|i| e.portfolio_names.get(i).map(|n| Cell::text(n.clone())).unwrap_or(Cell::Empty))
                .collect();
            head.push(Cell::text(e.instrument.clone()));
            head.push(e.measure.as_ref().map(|m| Cell::text(m.to_string())).unwrap_or(Cell::Empty));
            if multi_scenarios {
                head.push(e.scenario.as_ref().map(|s| Cell::text(s.name.clone())).unwrap_or(Cell::Empty));
            }
            let key_date = e.result.risk_key.date.map(Cell::Date).unwrap_or(Cell::Empty);
            let empty_dims = || vec![Cell::Empty; dims.len()];

            let mut push = |date: Cell, dim_cells: Vec<Cell>, value: Cell| -> Result<()> {
                let mut row = head.clone();
                if has_dates {
                    row.push(date);
                }
                row.extend(dim_cells);
                row.push(value);
                frame.push(row)
            };

            match &e.result.value {
                ResultValue::Float(v) => push(key_date, empty_dims(), Cell::Number(*v))?,
                ResultValue::Text(s) => push(key_date, empty_dims(), Cell::text(s.clone()))?,
                ResultValue::Instrument(i) => push(key_date, empty_dims(), Cell::text(i.to_string()))?,
                ResultValue::Error => push(
                    key_date,
                    empty_dims(),
                    Cell::text(e.result.error.clone().unwrap_or_default()),
                )?,
                ResultValue::Unsupported => {
                    if options.show_na {
                        push(key_date, empty_dims(), Cell::text("N/A"))?;
                    }
                }
                ResultValue::Series(s) => {
                    for (d, v) in s {
                        push(Cell::Date(*d), empty_dims(), Cell::Number(*v))?;
                    }
                }
                ResultValue::Table(t) => {
                    let date_idx = t.column_index(DATE_COLUMN);
                    for row in t.rows() {
                        let date = date_idx.map(|i| row.cells[i].clone()).unwrap_or_else(|| key_date.clone());
                        let dim_cells = dims
                            .iter()
                            .map(|d| t.cell(row, d).cloned().unwrap_or(Cell::Empty))
                            .collect();
                        push(date, dim_cells, Cell::Number(row.value))?;
                    }
                }
            }
        }

        if dims.iter().any(|d| d == "mkt_type") {
            let index: Vec<&str> = if has_dates { vec![DATES, RISK_MEASURE] } else { vec![RISK_MEASURE] };
            return Ok(Tabular::Long(frame.with_index(index)));
        }

        let rule = PivotRule::select(has_dates, multi_measures, multi_scenarios, &names);
        Ok(Tabular::Pivot(frame.pivot(VALUE, &rule.index, &rule.columns)?))
    }
}

fn single_measure(measures: &[RiskMeasure]) -> Option<&RiskMeasure> {
    match measures {
        [single] => Some(single),
        _ => None,
    }
}

struct FrameEntry {
    portfolio_names: Vec<String>,
    instrument: String,
    measure: Option<RiskMeasure>,
    scenario: Option<Scenario>,
    result: ResultInfo,
}

fn collect_entries(leaf: &Leaf, default_measure: Option<&RiskMeasure>, out: &mut Vec<FrameEntry>) -> Result<()> {
    let entry = |measure: Option<RiskMeasure>, scenario: Option<Scenario>, result: &ResultInfo| FrameEntry {
        portfolio_names: leaf.portfolio_names.clone(),
        instrument: leaf.instrument.display_name().to_string(),
        measure: measure.or_else(|| result.risk_key.risk_measure.clone()).or_else(|| default_measure.cloned()),
        scenario,
        result: result.clone(),
    };

    match &leaf.output {
        RiskOutput::Value(r) => out.push(entry(None, None, r)),
        RiskOutput::Measures(m) => {
            for (measure, value) in m.iter() {
                match value {
                    MeasureValue::Value(r) => out.push(entry(Some(measure.clone()), None, r)),
                    MeasureValue::Scenarios(s) => {
                        for (scenario, r) in s.iter() {
                            out.push(entry(Some(measure.clone()), Some(scenario.clone()), r));
                        }
                    }
                }
            }
        }
        RiskOutput::Scenarios(s) => {
            for (scenario, r) in s.iter() {
                out.push(entry(None, Some(scenario.clone()), r));
            }
        }
        RiskOutput::Portfolio(_) => {
            return Err(RiskError::InvalidArgument(
                "instrument leaf resolved to a portfolio".to_string(),
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::BatchScope;
    use crate::measure::Market;
    use crate::results::{MultipleRiskMeasureResult, MultipleScenarioResult};
    use crate::value::RiskTable;
    use std::collections::BTreeMap;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 12, d).unwrap()
    }

    fn fx(name: &str) -> Instrument {
        Instrument::new("FX", "Option")
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

    fn price(d: u32, v: f64) -> RiskOutput {
        RiskOutput::Value(ResultInfo::float(key(d, RiskMeasure::price()), v, Some("USD".to_string())))
    }

    fn two_leg(d: u32, a: f64, b: f64) -> PortfolioRiskResult {
        PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a"), fx("b")]),
            vec![RiskMeasure::price()],
            vec![price(d, a), price(d, b)],
        )
        .unwrap()
    }

    fn series(values: &[(u32, f64)], m: RiskMeasure) -> ResultInfo {
        let s: BTreeMap<NaiveDate, f64> = values.iter().map(|(d, v)| (date(*d), *v)).collect();
        ResultInfo::series(RiskKey { date: None, ..key(1, m) }, s, None)
    }

    #[test]
    fn test_length_must_match() {
        let err = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a")]),
            vec![RiskMeasure::price()],
            vec![],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_aggregate_flat() {
        let agg = two_leg(1, 10.0, 20.0).aggregate(false).unwrap();
        assert_eq!(agg.as_f64(), Some(30.0));
        assert_eq!(agg.unit.as_deref(), Some("USD"));
    }

    #[test]
    fn test_aggregate_nested() {
        let inner = two_leg(1, 1.0, 2.0);
        let mut portfolio = Portfolio::from_instruments(vec![fx("c")]);
        portfolio.push(inner.portfolio().clone().with_name("inner"));
        let outer = PortfolioRiskResult::from_outputs(
            portfolio,
            vec![RiskMeasure::price()],
            vec![price(1, 4.0), RiskOutput::Portfolio(inner)],
        )
        .unwrap();

        assert_eq!(outer.aggregate(false).unwrap().as_f64(), Some(7.0));
        let leaf = outer.by_path(&PortfolioPath::new(vec![1, 1])).unwrap();
        assert_eq!(leaf.as_value().unwrap().as_f64(), Some(2.0));
        assert_eq!(outer.leaves().unwrap()[2].portfolio_names, vec!["inner"]);
    }

    #[test]
    fn test_aggregate_rejects_errors() {
        let result = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a"), fx("b")]),
            vec![RiskMeasure::price()],
            vec![price(1, 1.0), RiskOutput::Value(ResultInfo::error_value(key(1, RiskMeasure::price()), "x"))],
        )
        .unwrap();
        assert!(matches!(result.aggregate(false), Err(RiskError::ErrorInAggregation(_))));
    }

    #[test]
    fn test_by_name_and_instrument() {
        let r = two_leg(1, 10.0, 20.0);
        assert_eq!(r.by_name("b").unwrap().as_value().unwrap().as_f64(), Some(20.0));
        assert_eq!(r.by_instrument(&fx("a")).unwrap().as_value().unwrap().as_f64(), Some(10.0));
        assert!(r.by_name("z").is_err());
    }

    #[test]
    fn test_add_disjoint_dates_composes_series() {
        let sum = two_leg(1, 10.0, 20.0).add(&two_leg(2, 11.0, 21.0)).unwrap();
        assert_eq!(sum.len(), 2);
        assert_eq!(sum.dates().unwrap(), vec![date(1), date(2)]);
        let b = sum.by_name("b").unwrap();
        let v = b.as_measures().unwrap().value(&RiskMeasure::price()).unwrap();
        assert_eq!(v.as_series().unwrap()[&date(2)], 21.0);
        assert_eq!(sum.by_date(date(2)).aggregate(false).unwrap().as_f64(), Some(32.0));
    }

    #[test]
    fn test_add_overlap_rejected() {
        let err = two_leg(1, 10.0, 20.0).add(&two_leg(1, 10.0, 20.0)).unwrap_err();
        assert_eq!(err, RiskError::OverlappingResults);
    }

    #[test]
    fn test_add_new_instrument_unions_portfolio() {
        let other = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("c")]),
            vec![RiskMeasure::price()],
            vec![price(1, 5.0)],
        )
        .unwrap();
        let sum = two_leg(1, 10.0, 20.0).add(&other).unwrap();
        assert_eq!(sum.portfolio().instrument_names(), vec!["a", "b", "c"]);
        assert_eq!(sum.aggregate(false).unwrap().as_f64(), Some(35.0));
    }

    #[test]
    fn test_lazy_slicing_waits_for_dispatch() {
        let scope = BatchScope::new();
        scope.enter();
        let pending = PricingFuture::in_scope(&scope);
        let result = PortfolioRiskResult::new(
            Portfolio::from_instruments(vec![fx("a")]),
            vec![RiskMeasure::price()],
            vec![pending.clone()],
        )
        .unwrap();
        let doubled = result.scale(2.0);
        assert_eq!(doubled.outputs().unwrap_err(), RiskError::ResultUnderOpenContext);

        scope.exit();
        pending.set_result(price(1, 4.0));
        assert!(doubled.done());
        assert_eq!(doubled.aggregate(false).unwrap().as_f64(), Some(8.0));
        assert!(result.as_future().result().unwrap().done());
    }

    #[test]
    fn test_retain_instruments() {
        let kept = two_leg(1, 10.0, 20.0).retain_instruments(|i| i.name.as_deref() != Some("a"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.aggregate(false).unwrap().as_f64(), Some(20.0));
    }

    #[test]
    fn test_multi_measure_slicing() {
        let leg = |name: &str, p: f64, d: f64| {
            RiskOutput::Measures(MultipleRiskMeasureResult::from_results(
                fx(name),
                vec![
                    (RiskMeasure::price(), ResultInfo::float(key(1, RiskMeasure::price()), p, None)),
                    (RiskMeasure::delta(), ResultInfo::float(key(1, RiskMeasure::delta()), d, None)),
                ],
            ))
        };
        let r = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a"), fx("b")]),
            vec![RiskMeasure::price(), RiskMeasure::delta()],
            vec![leg("a", 1.0, 0.1), leg("b", 2.0, 0.2)],
        )
        .unwrap();
        assert!(r.aggregate(false).is_err());
        let by_measure = r.aggregate_by_measure(false).unwrap();
        assert_eq!(by_measure[&RiskMeasure::price()].as_f64(), Some(3.0));
        assert!(r.by_measure(&RiskMeasure::vega()).is_err());

        // (false, true, false): names by measure
        let frame = r.to_frame(&DisplayOptions::default()).unwrap();
        let pivot = frame.as_pivot().unwrap();
        assert_eq!(pivot.index_names, vec![INSTRUMENT_NAME]);
        assert_eq!(pivot.column_names, vec![RISK_MEASURE]);
        assert_eq!(pivot.get(&["b"], &["Delta"]), Some(&Cell::Number(0.2)));
    }

    #[test]
    fn test_frame_scalar_single_measure() {
        // (false, false, false)
        let frame = two_leg(1, 10.0, 20.0).to_frame(&DisplayOptions::default()).unwrap();
        let pivot = frame.as_pivot().unwrap();
        assert_eq!(pivot.shape(), (2, 1));
        assert_eq!(pivot.get(&["a"], &["Price"]), Some(&Cell::Number(10.0)));
    }

    #[test]
    fn test_frame_dated_single_measure() {
        // (true, false, _)
        let r = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a"), fx("b")]),
            vec![RiskMeasure::price()],
            vec![
                RiskOutput::Value(series(&[(1, 1.0), (2, 2.0)], RiskMeasure::price())),
                RiskOutput::Value(series(&[(1, 3.0), (2, 4.0)], RiskMeasure::price())),
            ],
        )
        .unwrap();
        let frame = r.to_frame(&DisplayOptions::default()).unwrap();
        let pivot = frame.as_pivot().unwrap();
        assert_eq!(pivot.index_names, vec![DATES]);
        assert_eq!(pivot.column_names, vec![INSTRUMENT_NAME]);
        assert_eq!(pivot.get(&["2021-12-02"], &["b"]), Some(&Cell::Number(4.0)));
    }

    #[test]
    fn test_frame_dated_multi_measure() {
        // (true, true, _)
        let leg = MultipleRiskMeasureResult::from_results(
            fx("a"),
            vec![
                (RiskMeasure::price(), series(&[(1, 1.0), (2, 2.0)], RiskMeasure::price())),
                (RiskMeasure::delta(), series(&[(1, 0.1), (2, 0.2)], RiskMeasure::delta())),
            ],
        );
        let frame = leg.to_frame(&DisplayOptions::default()).unwrap();
        let pivot = frame.as_pivot().unwrap();
        assert_eq!(pivot.column_names, vec![INSTRUMENT_NAME, RISK_MEASURE]);
        assert_eq!(pivot.get(&["2021-12-01"], &["a", "Delta"]), Some(&Cell::Number(0.1)));
    }

    #[test]
    fn test_frame_scenarios() {
        // (false, false, true)
        let up = Scenario::new("up", "CurveScenario");
        let down = Scenario::new("down", "CurveScenario");
        let scen = MultipleScenarioResult::new(
            fx("a"),
            IndexMap::from([
                (up, ResultInfo::float(key(1, RiskMeasure::price()), 1.0, None)),
                (down, ResultInfo::float(key(1, RiskMeasure::price()), -1.0, None)),
            ]),
        );
        let frame = scen.to_frame(&DisplayOptions::default()).unwrap();
        let pivot = frame.as_pivot().unwrap();
        assert_eq!(pivot.column_names, vec![SCENARIO]);
        assert_eq!(pivot.get(&["a"], &["down"]), Some(&Cell::Number(-1.0)));
    }

    fn scenario_measures(name: &str, values: [(RiskMeasure, ResultInfo, ResultInfo); 2]) -> RiskOutput {
        let measures = values
            .into_iter()
            .map(|(m, up, down)| {
                let by_scenario = MultipleScenarioResult::new(
                    fx(name),
                    IndexMap::from([
                        (Scenario::new("up", "CurveScenario"), up),
                        (Scenario::new("down", "CurveScenario"), down),
                    ]),
                );
                (m, MeasureValue::Scenarios(by_scenario))
            })
            .collect();
        RiskOutput::Measures(MultipleRiskMeasureResult::new(fx(name), measures))
    }

    #[test]
    fn test_frame_measures_by_scenario() {
        // (false, true, true)
        let float = |m: RiskMeasure, v: f64| ResultInfo::float(key(1, m), v, None);
        let leg = |name: &str, base: f64| {
            scenario_measures(
                name,
                [
                    (RiskMeasure::price(), float(RiskMeasure::price(), base + 1.0), float(RiskMeasure::price(), base - 1.0)),
                    (RiskMeasure::delta(), float(RiskMeasure::delta(), base / 10.0), float(RiskMeasure::delta(), -base / 10.0)),
                ],
            )
        };
        let r = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a"), fx("b")]),
            vec![RiskMeasure::price(), RiskMeasure::delta()],
            vec![leg("a", 10.0), leg("b", 20.0)],
        )
        .unwrap();

        let frame = r.to_frame(&DisplayOptions::default()).unwrap();
        let pivot = frame.as_pivot().unwrap();
        assert_eq!(pivot.index_names, vec![INSTRUMENT_NAME, RISK_MEASURE]);
        assert_eq!(pivot.column_names, vec![SCENARIO]);
        assert_eq!(pivot.shape(), (4, 2));
        assert_eq!(pivot.get(&["b", "Price"], &["down"]), Some(&Cell::Number(19.0)));
        assert_eq!(pivot.get(&["a", "Delta"], &["up"]), Some(&Cell::Number(1.0)));
    }

    #[test]
    fn test_frame_dated_measures_by_scenario() {
        // (true, true, true)
        let leg = scenario_measures(
            "a",
            [
                (
                    RiskMeasure::price(),
                    series(&[(1, 1.0), (2, 2.0)], RiskMeasure::price()),
                    series(&[(1, -1.0), (2, -2.0)], RiskMeasure::price()),
                ),
                (
                    RiskMeasure::delta(),
                    series(&[(1, 0.1), (2, 0.2)], RiskMeasure::delta()),
                    series(&[(1, -0.1), (2, -0.2)], RiskMeasure::delta()),
                ),
            ],
        );
        let r = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a")]),
            vec![RiskMeasure::price(), RiskMeasure::delta()],
            vec![leg],
        )
        .unwrap();

        let frame = r.to_frame(&DisplayOptions::default()).unwrap();
        let pivot = frame.as_pivot().unwrap();
        assert_eq!(pivot.index_names, vec![DATES]);
        assert_eq!(pivot.column_names, vec![INSTRUMENT_NAME, RISK_MEASURE, SCENARIO]);
        assert_eq!(pivot.shape(), (2, 4));
        assert_eq!(
            pivot.get(&["2021-12-02"], &["a", "Delta", "down"]),
            Some(&Cell::Number(-0.2))
        );
    }

    #[test]
    fn test_frame_bucketed_is_long() {
        let table = RiskTable::from_rows(
            ["mkt_type", "mkt_point"],
            vec![(vec![Cell::from("IR"), Cell::from("1y")], 1.0), (vec![Cell::from("IR"), Cell::from("2y")], 2.0)],
        )
        .unwrap();
        let r = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a")]),
            vec![RiskMeasure::delta()],
            vec![RiskOutput::Value(ResultInfo::table(key(1, RiskMeasure::delta()), table, None))],
        )
        .unwrap();
        let frame = r.to_frame(&DisplayOptions::default()).unwrap();
        let long = frame.as_long().unwrap();
        assert_eq!(long.index(), &[RISK_MEASURE.to_string()]);
        assert_eq!(long.len(), 2);
        assert_eq!(long.sum(VALUE).unwrap(), 3.0);
    }

    #[test]
    fn test_frame_errors_and_unsupported() {
        let r = PortfolioRiskResult::from_outputs(
            Portfolio::from_instruments(vec![fx("a"), fx("b"), fx("c")]),
            vec![RiskMeasure::price()],
            vec![
                price(1, 1.0),
                RiskOutput::Value(ResultInfo::error_value(key(1, RiskMeasure::price()), "no vol surface")),
                RiskOutput::Value(ResultInfo::unsupported(key(1, RiskMeasure::price()))),
            ],
        )
        .unwrap();

        let hidden = r.to_frame(&DisplayOptions::default()).unwrap();
        let pivot = hidden.as_pivot().unwrap();
        assert_eq!(pivot.shape(), (2, 1));
        assert_eq!(pivot.get(&["b"], &["Price"]), Some(&Cell::text("no vol surface")));

        let shown = r.to_frame(&DisplayOptions::default().with_show_na(true)).unwrap();
        assert_eq!(shown.as_pivot().unwrap().get(&["c"], &["Price"]), Some(&Cell::text("N/A")));
    }
}
