//! Result values with provenance
//!
//! [`ResultInfo`] wraps one computed value together with the [`RiskKey`] it was
//! computed under, its unit and an optional error. The payload is one of the
//! [`ResultValue`] variants; composition and aggregation only ever combine
//! payloads of the same variant.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::compose;
use crate::error::{Result, RiskError};
use crate::measure::{combine_risk_key, RiskKey};
use crate::priceable::Instrument;

/// Name of the date dimension in bucketed tables
pub const DATE_COLUMN: &str = "date";

/// A dimension cell of a bucketed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Empty,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Cell::Empty => 0,
            Cell::Number(_) => 1,
            Cell::Date(_) => 2,
            Cell::Text(_) => 3,
        }
    }

    /// Total order: empty, numbers, dates, text
    pub fn total_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Number(a), Cell::Number(b)) => a.total_cmp(b),
            (Cell::Date(a), Cell::Date(b)) => a.cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Hashable representation used for grouping
    pub(crate) fn group_key(&self) -> String {
        match self {
            Cell::Empty => "e:".to_string(),
            Cell::Number(n) => format!("n:{}", n),
            Cell::Date(d) => format!("d:{}", d),
            Cell::Text(s) => format!("t:{}", s),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Date(d) => write!(f, "{}", d),
            Cell::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<NaiveDate> for Cell {
    fn from(d: NaiveDate) -> Self {
        Cell::Date(d)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

/// One row of a bucketed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<Cell>,
    pub value: f64,
}

/// Bucketed result: dimension columns plus a `value` column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskTable {
    columns: Vec<String>,
    rows: Vec<TableRow>,
}

impl RiskTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from `(cells, value)` rows
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<(Vec<Cell>, f64)>,
    ) -> Result<Self> {
        let mut table = Self::new(columns);
        for (cells, value) in rows {
            table.push_row(cells, value)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, cells: Vec<Cell>, value: f64) -> Result<()> {
        if cells.len() != self.columns.len() {
            return Err(RiskError::InvalidArgument(format!(
                "row has {} cells, table has {} columns",
                cells.len(),
                self.columns.len()
            )));
        }
        self.rows.push(TableRow { cells, value });
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell of `row` in column `name`
    pub fn cell<'a>(&self, row: &'a TableRow, name: &str) -> Option<&'a Cell> {
        self.column_index(name).and_then(|i| row.cells.get(i))
    }

    /// Sum of the value column
    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.value).sum()
    }

    /// Distinct dates in the date column, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        let Some(idx) = self.column_index(DATE_COLUMN) else {
            return Vec::new();
        };
        let dates: BTreeSet<NaiveDate> = self
            .rows
            .iter()
            .filter_map(|r| r.cells[idx].as_date())
            .collect();
        dates.into_iter().collect()
    }

    /// Copy with a leading date column, unless one already exists
    pub fn with_date_column(&self, date: NaiveDate) -> Self {
        if self.has_column(DATE_COLUMN) {
            return self.clone();
        }
        let mut columns = vec![DATE_COLUMN.to_string()];
        columns.extend(self.columns.iter().cloned());
        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut cells = vec![Cell::Date(date)];
                cells.extend(r.cells.iter().cloned());
                TableRow { cells, value: r.value }
            })
            .collect();
        Self { columns, rows }
    }

    /// Rows whose date is one of `dates`
    pub fn filter_dates(&self, dates: &[NaiveDate]) -> Self {
        match self.column_index(DATE_COLUMN) {
            Some(idx) => self.filter(|r| {
                r.cells[idx]
                    .as_date()
                    .map(|d| dates.contains(&d))
                    .unwrap_or(false)
            }),
            None => self.clone(),
        }
    }

    /// Rows accepted by `keep`
    pub fn filter(&self, keep: impl Fn(&TableRow) -> bool) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Copy without column `name`
    pub fn drop_column(&self, name: &str) -> Self {
        let Some(idx) = self.column_index(name) else {
            return self.clone();
        };
        let mut columns = self.columns.clone();
        columns.remove(idx);
        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut cells = r.cells.clone();
                cells.remove(idx);
                TableRow { cells, value: r.value }
            })
            .collect();
        Self { columns, rows }
    }

    /// Copy laid out on `columns`; columns this table lacks are zero-filled
    pub fn reindexed(&self, columns: &[String]) -> Self {
        let mapping: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| TableRow {
                cells: mapping
                    .iter()
                    .map(|m| match m {
                        Some(i) => r.cells[*i].clone(),
                        None => Cell::Number(0.0),
                    })
                    .collect(),
                value: r.value,
            })
            .collect();
        Self {
            columns: columns.to_vec(),
            rows,
        }
    }

    /// Copy with every value mapped through `f`
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| TableRow {
                    cells: r.cells.clone(),
                    value: f(r.value),
                })
                .collect(),
        }
    }

    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<TableRow>) -> Self {
        Self { columns, rows }
    }
}

/// Kind tag of a [`ResultValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    Float,
    Text,
    Series,
    Table,
    Error,
    Unsupported,
    Instrument,
}

impl ResultKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResultKind::Float => "Float",
            ResultKind::Text => "Text",
            ResultKind::Series => "Series",
            ResultKind::Table => "Table",
            ResultKind::Error => "ErrorValue",
            ResultKind::Unsupported => "UnsupportedValue",
            ResultKind::Instrument => "Instrument",
        }
    }
}

/// Raw payload of a result, without provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultValue {
    Float(f64),
    Text(String),
    /// One value per pricing date, ascending
    Series(BTreeMap<NaiveDate, f64>),
    Table(RiskTable),
    /// The calculation failed; the message is in [`ResultInfo::error`]
    Error,
    /// The measure is not computable for this instrument
    Unsupported,
    /// Instrument resolved by the service
    Instrument(Box<Instrument>),
}

impl ResultValue {
    pub fn kind(&self) -> ResultKind {
        match self {
            ResultValue::Float(_) => ResultKind::Float,
            ResultValue::Text(_) => ResultKind::Text,
            ResultValue::Series(_) => ResultKind::Series,
            ResultValue::Table(_) => ResultKind::Table,
            ResultValue::Error => ResultKind::Error,
            ResultValue::Unsupported => ResultKind::Unsupported,
            ResultValue::Instrument(_) => ResultKind::Instrument,
        }
    }
}

/// A computed risk value with provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    pub risk_key: RiskKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    pub value: ResultValue,
}

impl ResultInfo {
    pub fn new(risk_key: RiskKey, value: ResultValue, unit: Option<String>) -> Self {
        Self {
            risk_key,
            unit,
            error: None,
            request_id: None,
            value,
        }
    }

    pub fn float(risk_key: RiskKey, value: f64, unit: Option<String>) -> Self {
        Self::new(risk_key, ResultValue::Float(value), unit)
    }

    pub fn text(risk_key: RiskKey, value: impl Into<String>) -> Self {
        Self::new(risk_key, ResultValue::Text(value.into()), None)
    }

    pub fn series(risk_key: RiskKey, values: BTreeMap<NaiveDate, f64>, unit: Option<String>) -> Self {
        Self::new(risk_key, ResultValue::Series(values), unit)
    }

    pub fn table(risk_key: RiskKey, table: RiskTable, unit: Option<String>) -> Self {
        Self::new(risk_key, ResultValue::Table(table), unit)
    }

    /// A failed calculation (ErrorValue)
    pub fn error_value(risk_key: RiskKey, error: impl Into<String>) -> Self {
        Self {
            risk_key,
            unit: None,
            error: Some(error.into()),
            request_id: None,
            value: ResultValue::Error,
        }
    }

    /// A measure that does not apply to the instrument (UnsupportedValue)
    pub fn unsupported(risk_key: RiskKey) -> Self {
        Self::new(risk_key, ResultValue::Unsupported, None)
    }

    pub fn resolved_instrument(risk_key: RiskKey, instrument: Instrument) -> Self {
        Self::new(risk_key, ResultValue::Instrument(Box::new(instrument)), None)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn kind(&self) -> ResultKind {
        self.value.kind()
    }

    pub fn raw_value(&self) -> &ResultValue {
        &self.value
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            ResultValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&BTreeMap<NaiveDate, f64>> {
        match &self.value {
            ResultValue::Series(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&RiskTable> {
        match &self.value {
            ResultValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_instrument(&self) -> Option<&Instrument> {
        match &self.value {
            ResultValue::Instrument(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.value, ResultValue::Error)
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.value, ResultValue::Unsupported)
    }

    /// Dates indexing the payload: series keys or the table's date column
    pub fn dates(&self) -> Vec<NaiveDate> {
        match &self.value {
            ResultValue::Series(s) => s.keys().copied().collect(),
            ResultValue::Table(t) => t.dates(),
            _ => Vec::new(),
        }
    }

    /// Payload total as a single number: floats, series sum, table sum
    pub fn total(&self) -> Option<f64> {
        match &self.value {
            ResultValue::Float(v) => Some(*v),
            ResultValue::Series(s) => Some(s.values().sum()),
            ResultValue::Table(t) => Some(t.total()),
            _ => None,
        }
    }

    /// Copy with every numeric payload value mapped through `f`
    pub fn map_numeric(&self, f: impl Fn(f64) -> f64) -> ResultInfo {
        let value = match &self.value {
            ResultValue::Float(v) => ResultValue::Float(f(*v)),
            ResultValue::Series(s) => {
                ResultValue::Series(s.iter().map(|(d, v)| (*d, f(*v))).collect())
            }
            ResultValue::Table(t) => ResultValue::Table(t.map_values(&f)),
            other => other.clone(),
        };
        ResultInfo {
            value,
            ..self.clone()
        }
    }

    /// Multiply numeric payloads by `factor`
    pub fn scale(&self, factor: f64) -> ResultInfo {
        self.map_numeric(|v| v * factor)
    }

    /// Add `amount` to numeric payloads
    pub fn add_scalar(&self, amount: f64) -> ResultInfo {
        self.map_numeric(|v| v + amount)
    }

    /// Sum two results of the same kind
    ///
    /// Errors propagate as data: if either side is an ErrorValue, that
    /// value is returned unchanged.
    pub fn add(&self, other: &ResultInfo) -> Result<ResultInfo> {
        if self.is_error() {
            return Ok(self.clone());
        }
        if other.is_error() {
            return Ok(other.clone());
        }
        let unit = merge_units(self.unit.as_ref(), other.unit.as_ref())?;
        let risk_key = combine_risk_key(&self.risk_key, &other.risk_key);
        let value = match (&self.value, &other.value) {
            (ResultValue::Float(a), ResultValue::Float(b)) => ResultValue::Float(a + b),
            (ResultValue::Series(a), ResultValue::Series(b)) => {
                let mut sum = a.clone();
                for (d, v) in b {
                    *sum.entry(*d).or_insert(0.0) += v;
                }
                ResultValue::Series(sum)
            }
            (ResultValue::Table(_), ResultValue::Table(_)) => {
                ResultValue::Table(compose::aggregate_risk(&[self.clone(), other.clone()], None)?)
            }
            _ => {
                return Err(RiskError::TypeMismatch {
                    lhs: self.kind().name(),
                    rhs: other.kind().name(),
                })
            }
        };
        Ok(ResultInfo {
            risk_key,
            unit,
            error: None,
            request_id: None,
            value,
        })
    }
}

/// Unit of a combination: equal units, or whichever side has one
pub(crate) fn merge_units(lhs: Option<&String>, rhs: Option<&String>) -> Result<Option<String>> {
    match (lhs, rhs) {
        (Some(a), Some(b)) if a != b => Err(RiskError::UnitMismatch {
            lhs: a.clone(),
            rhs: b.clone(),
        }),
        (Some(a), _) => Ok(Some(a.clone())),
        (None, b) => Ok(b.cloned()),
    }
}

impl fmt::Display for ResultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ResultValue::Float(v) => write!(f, "{}", v),
            ResultValue::Text(s) => write!(f, "{}", s),
            ResultValue::Series(s) => write!(f, "Series({} points)", s.len()),
            ResultValue::Table(t) => write!(f, "Table({} rows)", t.len()),
            ResultValue::Error => write!(f, "Error: {}", self.error.as_deref().unwrap_or("")),
            ResultValue::Unsupported => write!(f, "N/A"),
            ResultValue::Instrument(i) => write!(f, "{}", i),
        }
    }
}
