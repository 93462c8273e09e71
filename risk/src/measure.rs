//! Risk measures, scenarios, markets and the provenance key of a result
//!
//! A [`RiskKey`] records under which provider, date, market, parameters,
//! scenario and measure a value was computed. Every field is optional so that
//! [`combine_risk_key`] can keep only what two contributing calculations have
//! in common.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named quantity to compute for a priceable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RiskMeasure {
    /// Display name (e.g. "Price", "IRDelta")
    pub name: String,

    /// Measure type understood by the service (e.g. "PV", "Delta")
    pub measure_type: String,

    /// Optional asset class restriction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_class: Option<String>,

    /// Optional reporting currency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl RiskMeasure {
    /// Create a new risk measure
    pub fn new(name: impl Into<String>, measure_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measure_type: measure_type.into(),
            asset_class: None,
            currency: None,
        }
    }

    /// Present value in the instrument's pricing currency
    pub fn price() -> Self {
        Self::new("Price", "PV")
    }

    /// Present value per unit of notional
    pub fn dollar_price() -> Self {
        Self::new("DollarPrice", "Dollar Price")
    }

    /// First order sensitivity
    pub fn delta() -> Self {
        Self::new("Delta", "Delta")
    }

    /// Volatility sensitivity
    pub fn vega() -> Self {
        Self::new("Vega", "Vega")
    }

    /// Pseudo-measure asking the service to resolve an instrument's
    /// relative parameters; answered with a `LegDefinition` datum.
    pub fn resolved_instrument() -> Self {
        Self::new("ResolvedInstrumentValues", "Resolved Instrument Values")
    }

    /// Restrict to an asset class
    pub fn with_asset_class(mut self, asset_class: impl Into<String>) -> Self {
        self.asset_class = Some(asset_class.into());
        self
    }

    /// Report in a currency
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Whether this is the present-value measure
    pub fn is_price(&self) -> bool {
        self.measure_type == "PV"
    }
}

impl fmt::Display for RiskMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.currency {
            Some(ccy) => write!(f, "{} {}", self.name, ccy),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A named market perturbation under which a calculation is re-run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,

    /// Scenario type (e.g. "CurveScenario", "MarketDataShockBasedScenario")
    pub kind: String,

    /// Shock definition, kept in the service's string form
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Kind of market data snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketKind {
    Close,
    Live,
    Overlay,
}

/// Market data a calculation was run against
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Market {
    pub kind: MarketKind,

    /// Pricing location (e.g. "NYC", "LDN", "HKG", "TKO")
    pub location: String,

    /// Market data as-of date (None for live or location-only markets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl Market {
    /// Close market at a location for a date
    pub fn close(location: impl Into<String>, date: Option<NaiveDate>) -> Self {
        Self {
            kind: MarketKind::Close,
            location: location.into(),
            date,
        }
    }

    /// Live market at a location
    pub fn live(location: impl Into<String>) -> Self {
        Self {
            kind: MarketKind::Live,
            location: location.into(),
            date: None,
        }
    }

    /// Same market without its date, used when comparing historical keys
    pub fn location_only(&self) -> Self {
        Self {
            kind: self.kind,
            location: self.location.clone(),
            date: None,
        }
    }
}

/// Request-level calculation parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskRequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csa_term: Option<String>,

    #[serde(default)]
    pub raw_results: bool,
}

/// Provenance of a computed value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RiskKey {
    pub provider: Option<String>,
    pub date: Option<NaiveDate>,
    pub market: Option<Market>,
    pub params: Option<RiskRequestParams>,
    pub scenario: Option<Scenario>,
    pub risk_measure: Option<RiskMeasure>,
}

impl RiskKey {
    /// Fully specified key
    pub fn new(
        provider: impl Into<String>,
        date: NaiveDate,
        market: Market,
        params: RiskRequestParams,
        scenario: Option<Scenario>,
        risk_measure: RiskMeasure,
    ) -> Self {
        Self {
            provider: Some(provider.into()),
            date: Some(date),
            market: Some(market),
            params: Some(params),
            scenario,
            risk_measure: Some(risk_measure),
        }
    }

    /// Copy of this key for another date
    pub fn with_date(&self, date: Option<NaiveDate>) -> Self {
        Self {
            date,
            ..self.clone()
        }
    }

    /// Copy of this key for another measure
    pub fn with_measure(&self, risk_measure: RiskMeasure) -> Self {
        Self {
            risk_measure: Some(risk_measure),
            ..self.clone()
        }
    }

    /// Key without its measure
    pub fn ex_measure(&self) -> Self {
        Self {
            risk_measure: None,
            ..self.clone()
        }
    }

    /// Key with the date removed and the market reduced to its location
    pub fn historical(&self) -> Self {
        Self {
            date: None,
            market: self.market.as_ref().map(Market::location_only),
            ..self.clone()
        }
    }

    /// Pricing location, if known
    pub fn location(&self) -> Option<&str> {
        self.market.as_ref().map(|m| m.location.as_str())
    }
}

impl fmt::Display for RiskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "RiskKey(provider={}, date={}, location={}, scenario={}, measure={})",
            opt(self.provider.clone()),
            opt(self.date.map(|d| d.to_string())),
            opt(self.location().map(str::to_string)),
            opt(self.scenario.as_ref().map(|s| s.name.clone())),
            opt(self.risk_measure.as_ref().map(|m| m.name.clone())),
        )
    }
}

fn keep_equal<T: PartialEq + Clone>(lhs: &Option<T>, rhs: &Option<T>) -> Option<T> {
    if lhs == rhs {
        lhs.clone()
    } else {
        None
    }
}

/// Merge two keys field by field, nulling any field on which they differ
pub fn combine_risk_key(key1: &RiskKey, key2: &RiskKey) -> RiskKey {
    RiskKey {
        provider: keep_equal(&key1.provider, &key2.provider),
        date: keep_equal(&key1.date, &key2.date),
        market: keep_equal(&key1.market, &key2.market),
        params: keep_equal(&key1.params, &key2.params),
        scenario: keep_equal(&key1.scenario, &key2.scenario),
        risk_measure: keep_equal(&key1.risk_measure, &key2.risk_measure),
    }
}

/// Whether two keys may be combined: same provider, location, parameters
/// and scenario, ignoring date and measure.
pub fn risk_keys_compatible(lhs: &RiskKey, rhs: &RiskKey) -> bool {
    lhs.historical().ex_measure() == rhs.historical().ex_measure()
}
