//! Tabular export of result containers
//!
//! Results flatten into a long-form [`DataFrame`] with one row per value.
//! [`PivotRule`] picks the index and column axes from the shape of the
//! data; bucketed results stay in long form.

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Result, RiskError};
use crate::value::Cell;

pub const VALUE: &str = "value";
pub const DATES: &str = "dates";
pub const INSTRUMENT_NAME: &str = "instrument_name";
pub const RISK_MEASURE: &str = "risk_measure";
pub const SCENARIO: &str = "scenario";
pub const PORTFOLIO_NAME_PREFIX: &str = "portfolio_name_";

/// Long-form frame of named columns
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataFrame {
    index: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl DataFrame {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            index: Vec::new(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(RiskError::InvalidArgument(format!(
                "row has {} cells, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Mark `names` as the index columns
    pub fn with_index<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.index = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
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

    /// Cells of one column
    pub fn column(&self, name: &str) -> Result<Vec<&Cell>> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| RiskError::NotFound(format!("column {}", name)))?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Sum of the numeric cells of one column
    pub fn sum(&self, name: &str) -> Result<f64> {
        Ok(self.column(name)?.into_iter().filter_map(Cell::as_f64).sum())
    }

    /// Reshape on `index` x `columns`; numeric collisions are summed
    pub fn pivot(&self, values: &str, index: &[String], columns: &[String]) -> Result<PivotTable> {
        let lookup = |names: &[String]| -> Result<Vec<usize>> {
            names
                .iter()
                .map(|n| {
                    self.column_index(n)
                        .ok_or_else(|| RiskError::NotFound(format!("column {}", n)))
                })
                .collect()
        };
        let index_idx = lookup(index)?;
        let column_idx = lookup(columns)?;
        let value_idx = lookup(&[values.to_string()])?[0];

        let key_of = |row: &Vec<Cell>, idx: &[usize]| -> (Vec<String>, Vec<Cell>) {
            (
                idx.iter().map(|i| row[*i].group_key()).collect(),
                idx.iter().map(|i| row[*i].clone()).collect(),
            )
        };

        let mut row_keys: IndexMap<Vec<String>, Vec<Cell>> = IndexMap::new();
        let mut col_keys: IndexMap<Vec<String>, Vec<Cell>> = IndexMap::new();
        let mut cells: IndexMap<(usize, usize), Cell> = IndexMap::new();

        for row in &self.rows {
            let (rk, rv) = key_of(row, &index_idx);
            let (ck, cv) = key_of(row, &column_idx);
            let ri = {
                let entry = row_keys.entry(rk);
                let i = entry.index();
                entry.or_insert(rv);
                i
            };
            let ci = {
                let entry = col_keys.entry(ck);
                let i = entry.index();
                entry.or_insert(cv);
                i
            };
            let value = row[value_idx].clone();
            cells
                .entry((ri, ci))
                .and_modify(|existing| {
                    *existing = match (&*existing, &value) {
                        (Cell::Number(a), Cell::Number(b)) => Cell::Number(a + b),
                        _ => value.clone(),
                    }
                })
                .or_insert(value);
        }

        let n_cols = col_keys.len();
        let mut values_grid = vec![vec![None; n_cols]; row_keys.len()];
        for ((ri, ci), cell) in cells {
            values_grid[ri][ci] = Some(cell);
        }

        Ok(PivotTable {
            index_names: index.to_vec(),
            column_names: columns.to_vec(),
            index: row_keys.into_values().collect(),
            columns: col_keys.into_values().collect(),
            values: values_grid,
        })
    }
}

/// Wide frame produced by [`DataFrame::pivot`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotTable {
    pub index_names: Vec<String>,
    pub column_names: Vec<String>,
    pub index: Vec<Vec<Cell>>,
    pub columns: Vec<Vec<Cell>>,
    pub values: Vec<Vec<Option<Cell>>>,
}

impl PivotTable {
    /// Cell at the row whose index renders as `row` and the column whose
    /// labels render as `column`
    pub fn get(&self, row: &[&str], column: &[&str]) -> Option<&Cell> {
        let matches = |labels: &Vec<Cell>, want: &[&str]| {
            labels.len() == want.len() && labels.iter().zip(want).all(|(c, w)| c.to_string() == *w)
        };
        let ri = self.index.iter().position(|l| matches(l, row))?;
        let ci = self.columns.iter().position(|l| matches(l, column))?;
        self.values[ri][ci].as_ref()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.index.len(), self.columns.len())
    }
}

/// Result of `to_frame`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Tabular {
    Long(DataFrame),
    Pivot(PivotTable),
}

impl Tabular {
    pub fn as_long(&self) -> Option<&DataFrame> {
        match self {
            Tabular::Long(df) => Some(df),
            Tabular::Pivot(_) => None,
        }
    }

    pub fn as_pivot(&self) -> Option<&PivotTable> {
        match self {
            Tabular::Long(_) => None,
            Tabular::Pivot(p) => Some(p),
        }
    }
}

/// Axes of a pivot chosen from the shape of a long frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotRule {
    pub index: Vec<String>,
    pub columns: Vec<String>,
}

impl PivotRule {
    /// Pick axes for a frame
    ///
    /// `names` are the portfolio and instrument name columns, outermost first.
    pub fn select(has_dates: bool, multi_measures: bool, multi_scenarios: bool, names: &[String]) -> Self {
        let with = |base: &[String], extra: &[&str]| -> Vec<String> {
            base.iter()
                .cloned()
                .chain(extra.iter().map(|s| s.to_string()))
                .collect()
        };
        let dates = vec![DATES.to_string()];
        let scenario_col: &[&str] = if multi_scenarios { &[SCENARIO] } else { &[] };

        match (has_dates, multi_measures, multi_scenarios) {
            (true, true, _) => Self {
                index: dates,
                columns: with(&with(names, &[RISK_MEASURE]), scenario_col),
            },
            (true, false, _) => Self {
                index: dates,
                columns: with(names, scenario_col),
            },
            (false, false, false) | (false, true, false) => Self {
                index: names.to_vec(),
                columns: vec![RISK_MEASURE.to_string()],
            },
            (false, false, true) => Self {
                index: names.to_vec(),
                columns: vec![SCENARIO.to_string()],
            },
            (false, true, true) => Self {
                index: with(names, &[RISK_MEASURE]),
                columns: vec![SCENARIO.to_string()],
            },
        }
    }
}
