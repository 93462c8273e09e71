//! Post-processing of individual results

use std::collections::BTreeMap;

use crate::error::Result;
use crate::value::{ResultInfo, ResultValue};

/// Maps one result to another; applied leaf by leaf by the containers
pub trait Transformer: Send + Sync {
    fn apply(&self, result: &ResultInfo) -> Result<ResultInfo>;
}

/// Collapses a bucketed table into the sum of its values
///
/// With filter coordinates, only rows whose cells render to the given text
/// in every named column are summed. Non-table results pass through.
#[derive(Debug, Clone, Default)]
pub struct ResultWithInfoAggregator {
    filter_coordinates: BTreeMap<String, String>,
}

impl ResultWithInfoAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coordinate(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_coordinates.insert(column.into(), value.into());
        self
    }
}

impl Transformer for ResultWithInfoAggregator {
    fn apply(&self, result: &ResultInfo) -> Result<ResultInfo> {
        let ResultValue::Table(table) = &result.value else {
            return Ok(result.clone());
        };
        let total = table
            .rows()
            .iter()
            .filter(|row| {
                self.filter_coordinates.iter().all(|(col, want)| {
                    table
                        .cell(row, col)
                        .map(|c| c.to_string() == *want)
                        .unwrap_or(false)
                })
            })
            .map(|row| row.value)
            .sum();
        Ok(ResultInfo::float(result.risk_key.clone(), total, result.unit.clone()))
    }
}
