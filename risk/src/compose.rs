//! Composition algebra over [`ResultInfo`] values
//!
//! `compose` merges two results of the same dated context into a richer
//! series or table. `aggregate_results` and `aggregate_risk` sum results
//! across instruments. All functions are pure.

use chrono::NaiveDate;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{Result, RiskError};
use crate::measure::combine_risk_key;
use crate::value::{merge_units, Cell, ResultInfo, ResultKind, ResultValue, RiskTable, TableRow, DATE_COLUMN};

/// Column priority used to order bucketed results
pub const SORT_PRIORITY: [&str; 6] = ["date", "time", "mkt_type", "mkt_asset", "mkt_class", "mkt_point"];

/// Merge two results computed for the same priceable and measure
///
/// - same-dated scalars: `rhs` wins
/// - scalars on different dates: a two-point series
/// - scalar with series: the scalar is written into the series
/// - series with series: union, `rhs` wins on shared dates
/// - table with table: `lhs` rows on dates `rhs` lacks, then all of `rhs`
///
/// Error values propagate unchanged and unsupported values yield the other
/// operand. Any other pairing fails with [`RiskError::CannotCompose`].
pub fn compose(lhs: &ResultInfo, rhs: &ResultInfo) -> Result<ResultInfo> {
    if rhs.is_error() {
        return Ok(rhs.clone());
    }
    if lhs.is_error() {
        return Ok(lhs.clone());
    }
    if lhs.is_unsupported() {
        return Ok(rhs.clone());
    }
    if rhs.is_unsupported() {
        return Ok(lhs.clone());
    }

    let unit = rhs.unit.clone().or_else(|| lhs.unit.clone());
    let risk_key = combine_risk_key(&lhs.risk_key, &rhs.risk_key);

    match (&lhs.value, &rhs.value) {
        (ResultValue::Float(_), ResultValue::Float(_))
        | (ResultValue::Text(_), ResultValue::Text(_))
        | (ResultValue::Instrument(_), ResultValue::Instrument(_))
            if lhs.risk_key.date == rhs.risk_key.date =>
        {
            Ok(rhs.clone())
        }
        (ResultValue::Float(a), ResultValue::Float(b)) => {
            let (d1, d2) = (dated(lhs)?, dated(rhs)?);
            let series = BTreeMap::from([(d1, *a), (d2, *b)]);
            Ok(ResultInfo::series(risk_key, series, unit))
        }
        (ResultValue::Series(s), ResultValue::Float(v)) => {
            let mut series = s.clone();
            series.insert(dated(rhs)?, *v);
            Ok(ResultInfo::series(risk_key, series, unit))
        }
        (ResultValue::Float(v), ResultValue::Series(s)) => {
            let mut series = s.clone();
            series.insert(dated(lhs)?, *v);
            Ok(ResultInfo::series(risk_key, series, unit))
        }
        (ResultValue::Series(a), ResultValue::Series(b)) => {
            let mut series = a.clone();
            series.extend(b.iter().map(|(d, v)| (*d, *v)));
            Ok(ResultInfo::series(risk_key, series, unit))
        }
        (ResultValue::Table(a), ResultValue::Table(b)) => {
            let a = dated_table(a, lhs)?;
            let b = dated_table(b, rhs)?;
            let rhs_dates = b.dates();
            let kept = a.filter(|row| {
                a.cell(row, DATE_COLUMN)
                    .and_then(Cell::as_date)
                    .map(|d| !rhs_dates.contains(&d))
                    .unwrap_or(true)
            });
            let table = concat_tables(&[&kept, &b]);
            Ok(ResultInfo::table(risk_key, sort_risk(&table), unit))
        }
        _ => Err(RiskError::CannotCompose {
            lhs: lhs.kind().name(),
            rhs: rhs.kind().name(),
        }),
    }
}

/// Fold [`compose`] over a sequence, left to right
pub fn compose_all<'a>(results: impl IntoIterator<Item = &'a ResultInfo>) -> Result<ResultInfo> {
    let mut iter = results.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| RiskError::InvalidArgument("nothing to compose".to_string()))?;
    iter.try_fold(first.clone(), |acc, r| compose(&acc, r))
}

fn dated(result: &ResultInfo) -> Result<NaiveDate> {
    result.risk_key.date.ok_or_else(|| {
        RiskError::InvalidArgument(format!(
            "{} result has no pricing date to compose on",
            result.kind().name()
        ))
    })
}

fn dated_table(table: &RiskTable, result: &ResultInfo) -> Result<RiskTable> {
    if table.has_column(DATE_COLUMN) {
        Ok(table.clone())
    } else {
        Ok(table.with_date_column(dated(result)?))
    }
}

/// Concatenate tables on the union of their columns, zero-filling gaps
fn concat_tables(tables: &[&RiskTable]) -> RiskTable {
    let mut columns: Vec<String> = Vec::new();
    for t in tables {
        for c in t.columns() {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }
    let rows = tables
        .iter()
        .flat_map(|t| t.reindexed(&columns).rows().to_vec())
        .collect();
    RiskTable::from_parts(columns, rows)
}

/// Slice a result to one date
///
/// A series yields the float for that date, a dated table the rows for that
/// date without the date column. Undated values are returned unchanged.
pub fn value_for_date(result: &ResultInfo, date: NaiveDate) -> Result<ResultInfo> {
    match &result.value {
        ResultValue::Series(s) => {
            let v = s
                .get(&date)
                .ok_or_else(|| RiskError::NotFound(format!("no value for {}", date)))?;
            Ok(ResultInfo::float(
                result.risk_key.with_date(Some(date)),
                *v,
                result.unit.clone(),
            ))
        }
        ResultValue::Table(t) if t.has_column(DATE_COLUMN) => {
            let sliced = t.filter_dates(&[date]).drop_column(DATE_COLUMN);
            Ok(ResultInfo::table(
                result.risk_key.with_date(Some(date)),
                sliced,
                result.unit.clone(),
            ))
        }
        _ => Ok(result.clone()),
    }
}

/// Slice a result to several dates; a single date behaves as [`value_for_date`]
pub fn value_for_dates(result: &ResultInfo, dates: &[NaiveDate]) -> Result<ResultInfo> {
    if let [date] = dates {
        return value_for_date(result, *date);
    }
    match &result.value {
        ResultValue::Series(s) => {
            let series = s
                .iter()
                .filter(|(d, _)| dates.contains(d))
                .map(|(d, v)| (*d, *v))
                .collect();
            Ok(ResultInfo::series(result.risk_key.clone(), series, result.unit.clone()))
        }
        ResultValue::Table(t) if t.has_column(DATE_COLUMN) => Ok(ResultInfo::table(
            result.risk_key.clone(),
            t.filter_dates(dates),
            result.unit.clone(),
        )),
        _ => Ok(result.clone()),
    }
}

/// Sum bucketed results row-wise
///
/// Tables are concatenated on the union of their columns, grouped on every
/// dimension and summed. With a `threshold`, rows whose absolute sum is not
/// above it are dropped.
pub fn aggregate_risk(results: &[ResultInfo], threshold: Option<f64>) -> Result<RiskTable> {
    let mut tables = Vec::with_capacity(results.len());
    for r in results {
        match &r.value {
            ResultValue::Table(t) => tables.push(t),
            ResultValue::Error => {
                return Err(RiskError::ErrorInAggregation(
                    r.error.clone().unwrap_or_default(),
                ))
            }
            _ => {
                return Err(RiskError::TypeMismatch {
                    lhs: ResultKind::Table.name(),
                    rhs: r.kind().name(),
                })
            }
        }
    }

    let combined = concat_tables(&tables);
    let mut groups: IndexMap<Vec<String>, TableRow> = IndexMap::new();
    for row in combined.rows() {
        let key: Vec<String> = row.cells.iter().map(Cell::group_key).collect();
        groups
            .entry(key)
            .and_modify(|g| g.value += row.value)
            .or_insert_with(|| row.clone());
    }

    let rows = groups
        .into_values()
        .filter(|r| threshold.map(|t| r.value.abs() > t).unwrap_or(true))
        .collect();
    Ok(sort_risk(&RiskTable::from_parts(combined.columns().to_vec(), rows)))
}

/// Subtract `right` from `left` bucket by bucket
pub fn subtract_risk(left: &ResultInfo, right: &ResultInfo) -> Result<ResultInfo> {
    let negated = right.scale(-1.0);
    let table = aggregate_risk(&[left.clone(), negated], None)?;
    let unit = merge_units(left.unit.as_ref(), right.unit.as_ref())?;
    Ok(ResultInfo::table(left.risk_key.clone(), table, unit))
}

/// Sum a collection of same-typed results
///
/// Fails on the first error value, on mixed result kinds, on mismatched
/// units and, unless `allow_mismatch_risk_keys`, on results priced under
/// different keys. When only some inputs carry a unit, that unit is used.
pub fn aggregate_results(results: &[ResultInfo], allow_mismatch_risk_keys: bool) -> Result<ResultInfo> {
    let first = results
        .first()
        .ok_or_else(|| RiskError::InvalidArgument("no results to aggregate".to_string()))?;

    let mut unit: Option<String> = None;
    for r in results {
        if r.is_error() {
            return Err(RiskError::ErrorInAggregation(r.error.clone().unwrap_or_default()));
        }
        if r.kind() != first.kind() {
            return Err(RiskError::TypeMismatch {
                lhs: first.kind().name(),
                rhs: r.kind().name(),
            });
        }
        unit = merge_units(unit.as_ref(), r.unit.as_ref())?;
        if !allow_mismatch_risk_keys && r.risk_key.historical() != first.risk_key.historical() {
            return Err(RiskError::RiskKeyMismatch(format!(
                "{} vs {}",
                first.risk_key, r.risk_key
            )));
        }
    }

    let risk_key = first.risk_key.clone();
    match &first.value {
        ResultValue::Float(_) => {
            let total = results.iter().filter_map(ResultInfo::as_f64).sum();
            Ok(ResultInfo::float(risk_key, total, unit))
        }
        ResultValue::Series(_) => {
            let mut sum: BTreeMap<NaiveDate, f64> = BTreeMap::new();
            for s in results.iter().filter_map(ResultInfo::as_series) {
                for (d, v) in s {
                    *sum.entry(*d).or_insert(0.0) += v;
                }
            }
            Ok(ResultInfo::series(risk_key, sum, unit))
        }
        ResultValue::Table(_) => Ok(ResultInfo::table(risk_key, aggregate_risk(results, None)?, unit)),
        ResultValue::Unsupported => Ok(ResultInfo::unsupported(risk_key)),
        _ => Err(RiskError::InvalidArgument(format!(
            "{} results cannot be aggregated",
            first.kind().name()
        ))),
    }
}

/// Order rows by the fixed column priority and move those columns first
pub fn sort_risk(table: &RiskTable) -> RiskTable {
    let sort_cols: Vec<(usize, bool)> = SORT_PRIORITY
        .iter()
        .filter_map(|c| table.column_index(c).map(|i| (i, *c == "mkt_point")))
        .collect();

    let mut rows = table.rows().to_vec();
    rows.sort_by(|a, b| {
        for (idx, is_point) in &sort_cols {
            let (x, y) = (&a.cells[*idx], &b.cells[*idx]);
            let ord = if *is_point {
                compare_points(x, y)
            } else {
                x.total_cmp(y)
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });

    let mut columns: Vec<String> = SORT_PRIORITY
        .iter()
        .filter(|c| table.has_column(c))
        .map(|c| c.to_string())
        .collect();
    columns.extend(
        table
            .columns()
            .iter()
            .filter(|c| !SORT_PRIORITY.contains(&c.as_str()))
            .cloned(),
    );
    RiskTable::from_parts(table.columns().to_vec(), rows).reindexed(&columns)
}

fn compare_points(x: &Cell, y: &Cell) -> Ordering {
    match (x, y) {
        (Cell::Text(a), Cell::Text(b)) => point_sort_order(a)
            .total_cmp(&point_sort_order(b))
            .then_with(|| a.cmp(b)),
        _ => x.total_cmp(y),
    }
}

/// Approximate length in days of a market point such as "3m", "1y6m", "O/N"
///
/// Unrecognised points sort first (0).
pub fn point_sort_order(point: &str) -> f64 {
    let p = point.trim().to_ascii_lowercase();
    match p.as_str() {
        "o/n" | "on" => return 1.0,
        "t/n" | "tn" => return 2.0,
        "s/n" | "sn" => return 3.0,
        _ => {}
    }

    let mut days = 0.0;
    let mut digits = String::new();
    let mut matched = false;
    for ch in p.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            digits.push(ch);
            continue;
        }
        let unit = match ch {
            'd' | 'b' => 1.0,
            'w' => 7.0,
            'm' => 30.0,
            'y' => 365.0,
            _ => return 0.0,
        };
        let Ok(n) = digits.parse::<f64>() else {
            return 0.0;
        };
        days += n * unit;
        digits.clear();
        matched = true;
    }
    if !matched || !digits.is_empty() {
        return 0.0;
    }
    days
}
