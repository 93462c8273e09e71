//! Priceables: instruments and (possibly nested) portfolios
//!
//! The instrument hierarchy of the service is not modelled here. An
//! [`Instrument`] is a typed header plus a JSON property bag that is passed
//! through to the risk service unchanged.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, RiskError};

/// Properties scaled by [`Instrument::scale`] when no parameter is named,
/// in lookup order
pub const DEFAULT_SCALING_PROPERTIES: [&str; 4] =
    ["notional_amount", "number_of_options", "quantity", "notional"];

/// A tradable instrument as understood by the risk service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub asset_class: String,

    pub instrument_type: String,

    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Instrument {
    pub fn new(asset_class: impl Into<String>, instrument_type: impl Into<String>) -> Self {
        Self {
            name: None,
            asset_class: asset_class.into(),
            instrument_type: instrument_type.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Numeric property
    pub fn number(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(Value::as_f64)
    }

    /// String property
    pub fn text(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Property holding an ISO date
    pub fn date(&self, key: &str) -> Option<NaiveDate> {
        self.text(key)
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    }

    /// Name, falling back to the instrument type
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.instrument_type)
    }

    /// Stable identity used to deduplicate registrations and key caches
    pub fn identity_key(&self) -> String {
        format!("{:?}", self)
    }

    /// Property that notional scaling applies to
    pub fn scaling_property(&self) -> Option<&'static str> {
        DEFAULT_SCALING_PROPERTIES
            .iter()
            .copied()
            .find(|p| self.number(p).is_some())
    }

    /// Copy with the scaling property multiplied by `factor`
    ///
    /// A numeric `premium` scales with the notional.
    pub fn scale(&self, factor: f64, parameter: Option<&str>) -> Result<Instrument> {
        let parameter = match parameter {
            Some(p) => p,
            None => self.scaling_property().ok_or_else(|| {
                RiskError::InvalidArgument(format!(
                    "{} has no scaling property",
                    self.display_name()
                ))
            })?,
        };

        let current = self.number(parameter).ok_or_else(|| {
            RiskError::InvalidArgument(format!(
                "{} has no numeric property {}",
                self.display_name(),
                parameter
            ))
        })?;

        let mut scaled = self.clone();
        scaled
            .properties
            .insert(parameter.to_string(), Value::from(current * factor));
        if let Some(premium) = self.number("premium") {
            scaled
                .properties
                .insert("premium".to_string(), Value::from(premium * factor));
        }
        Ok(scaled)
    }

    /// Copy with resolved fields from the service merged over the properties
    pub fn resolved(&self, fields: &serde_json::Map<String, Value>) -> Instrument {
        let mut resolved = self.clone();
        for (k, v) in fields {
            resolved.properties.insert(k.clone(), v.clone());
        }
        resolved
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Position of a priceable inside a nested portfolio
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortfolioPath(Vec<usize>);

impl PortfolioPath {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn root(index: usize) -> Self {
        Self(vec![index])
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First index and the remaining path
    pub fn split_first(&self) -> Option<(usize, PortfolioPath)> {
        self.0
            .split_first()
            .map(|(head, tail)| (*head, PortfolioPath(tail.to_vec())))
    }

    pub fn parent(&self) -> Option<PortfolioPath> {
        if self.0.len() <= 1 {
            None
        } else {
            Some(PortfolioPath(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

/// Anything that can be asked to compute a risk measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Priceable {
    Instrument(Instrument),
    Portfolio(Portfolio),
}

impl Priceable {
    pub fn name(&self) -> Option<&str> {
        match self {
            Priceable::Instrument(i) => i.name.as_deref(),
            Priceable::Portfolio(p) => p.name.as_deref(),
        }
    }

    pub fn as_instrument(&self) -> Option<&Instrument> {
        match self {
            Priceable::Instrument(i) => Some(i),
            Priceable::Portfolio(_) => None,
        }
    }

    pub fn as_portfolio(&self) -> Option<&Portfolio> {
        match self {
            Priceable::Instrument(_) => None,
            Priceable::Portfolio(p) => Some(p),
        }
    }
}

impl From<Instrument> for Priceable {
    fn from(instrument: Instrument) -> Self {
        Priceable::Instrument(instrument)
    }
}

impl From<Portfolio> for Priceable {
    fn from(portfolio: Portfolio) -> Self {
        Priceable::Portfolio(portfolio)
    }
}

/// An ordered, possibly nested collection of priceables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub priceables: Vec<Priceable>,
}

impl Portfolio {
    pub fn new(priceables: Vec<Priceable>) -> Self {
        Self {
            name: None,
            priceables,
        }
    }

    pub fn from_instruments(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        Self::new(instruments.into_iter().map(Priceable::Instrument).collect())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn len(&self) -> usize {
        self.priceables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priceables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Priceable> {
        self.priceables.iter()
    }

    pub fn push(&mut self, priceable: impl Into<Priceable>) {
        self.priceables.push(priceable.into());
    }

    /// Every instrument in the tree, depth first
    pub fn all_instruments(&self) -> Vec<&Instrument> {
        let mut out = Vec::new();
        for p in &self.priceables {
            match p {
                Priceable::Instrument(i) => out.push(i),
                Priceable::Portfolio(sub) => out.extend(sub.all_instruments()),
            }
        }
        out
    }

    /// Paths of every instrument in the tree, depth first
    pub fn all_paths(&self) -> Vec<PortfolioPath> {
        let mut out = Vec::new();
        for (idx, p) in self.priceables.iter().enumerate() {
            let path = PortfolioPath::root(idx);
            match p {
                Priceable::Instrument(_) => out.push(path),
                Priceable::Portfolio(sub) => out.extend(
                    sub.all_paths()
                        .into_iter()
                        .map(|sp| PortfolioPath::new([path.indices(), sp.indices()].concat())),
                ),
            }
        }
        out
    }

    /// Paths at which `instrument` appears
    pub fn paths(&self, instrument: &Instrument) -> Vec<PortfolioPath> {
        self.all_paths()
            .into_iter()
            .filter(|path| {
                matches!(self.get(path), Some(Priceable::Instrument(i)) if i == instrument)
            })
            .collect()
    }

    /// Paths of instruments with the given name
    pub fn paths_by_name(&self, name: &str) -> Vec<PortfolioPath> {
        self.all_paths()
            .into_iter()
            .filter(|path| {
                matches!(self.get(path), Some(Priceable::Instrument(i)) if i.name.as_deref() == Some(name))
            })
            .collect()
    }

    /// Priceable at a path
    pub fn get(&self, path: &PortfolioPath) -> Option<&Priceable> {
        let (head, rest) = path.split_first()?;
        let priceable = self.priceables.get(head)?;
        if rest.is_empty() {
            return Some(priceable);
        }
        match priceable {
            Priceable::Portfolio(sub) => sub.get(&rest),
            Priceable::Instrument(_) => None,
        }
    }

    /// Nesting depth (a flat portfolio has depth 1)
    pub fn depth(&self) -> usize {
        1 + self
            .priceables
            .iter()
            .filter_map(Priceable::as_portfolio)
            .map(Portfolio::depth)
            .max()
            .unwrap_or(0)
    }

    /// Whether `priceable` is a direct member
    pub fn contains(&self, priceable: &Priceable) -> bool {
        self.priceables.iter().any(|p| p == priceable)
    }

    /// This portfolio followed by the members of `other` it does not contain
    pub fn union(&self, other: &Portfolio) -> Portfolio {
        let mut priceables = self.priceables.clone();
        for p in &other.priceables {
            if !priceables.contains(p) {
                priceables.push(p.clone());
            }
        }
        Portfolio {
            name: self.name.clone(),
            priceables,
        }
    }

    /// Copy keeping only the top-level instruments accepted by `keep`
    pub fn retain_instruments(&self, keep: impl Fn(&Instrument) -> bool) -> Portfolio {
        Portfolio {
            name: self.name.clone(),
            priceables: self
                .priceables
                .iter()
                .filter(|p| match p {
                    Priceable::Instrument(i) => keep(i),
                    Priceable::Portfolio(_) => true,
                })
                .cloned()
                .collect(),
        }
    }

    /// Names of every named instrument in the tree
    pub fn instrument_names(&self) -> Vec<&str> {
        self.all_instruments()
            .into_iter()
            .filter_map(|i| i.name.as_deref())
            .collect()
    }
}

impl FromIterator<Instrument> for Portfolio {
    fn from_iter<I: IntoIterator<Item = Instrument>>(iter: I) -> Self {
        Portfolio::from_instruments(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(name: &str, notional: f64) -> Instrument {
        Instrument::new("Rates", "Swap")
            .with_name(name)
            .with_property("notional_amount", notional)
            .with_property("termination_date", "10y")
    }

    #[test]
    fn test_scale_uses_default_property() {
        let scaled = swap("s1", 1e6).scale(-0.5, None).unwrap();
        assert_eq!(scaled.number("notional_amount"), Some(-5e5));
        assert_eq!(scaled.text("termination_date"), Some("10y"));
    }

    #[test]
    fn test_scale_scales_premium() {
        let opt = Instrument::new("FX", "Option")
            .with_property("notional_amount", 1e6)
            .with_property("premium", 100.0);
        let scaled = opt.scale(2.0, Some("notional_amount")).unwrap();
        assert_eq!(scaled.number("premium"), Some(200.0));
    }

    #[test]
    fn test_scale_without_property_fails() {
        let inst = Instrument::new("Equity", "Stock");
        assert!(matches!(inst.scale(2.0, None), Err(RiskError::InvalidArgument(_))));
    }

    #[test]
    fn test_nested_paths() {
        let inner = Portfolio::from_instruments(vec![swap("a", 1.0), swap("b", 2.0)]).with_name("inner");
        let mut outer = Portfolio::from_instruments(vec![swap("c", 3.0)]);
        outer.push(inner);

        let paths = outer.all_paths();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[1], PortfolioPath::new(vec![1, 0]));
        assert_eq!(outer.depth(), 2);

        let b = swap("b", 2.0);
        assert_eq!(outer.paths(&b), vec![PortfolioPath::new(vec![1, 1])]);
        assert_eq!(outer.paths_by_name("c"), vec![PortfolioPath::root(0)]);
        assert!(matches!(
            outer.get(&PortfolioPath::new(vec![1, 1])),
            Some(Priceable::Instrument(i)) if i.name.as_deref() == Some("b")
        ));
        assert!(outer.get(&PortfolioPath::new(vec![0, 1])).is_none());
    }

    #[test]
    fn test_union_skips_duplicates() {
        let p1 = Portfolio::from_instruments(vec![swap("a", 1.0), swap("b", 2.0)]);
        let p2 = Portfolio::from_instruments(vec![swap("b", 2.0), swap("c", 3.0)]);
        let union = p1.union(&p2);
        assert_eq!(union.instrument_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_resolved_merges_fields() {
        let mut fields = serde_json::Map::new();
        fields.insert("strike_price".to_string(), Value::from(1.13));
        let resolved = swap("a", 1.0).resolved(&fields);
        assert_eq!(resolved.number("strike_price"), Some(1.13));
        assert_eq!(resolved.name.as_deref(), Some("a"));
    }
}
