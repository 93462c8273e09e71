//! Decoding of risk service payloads
//!
//! Each datum in a calculation response carries a `$type` discriminator.
//! [`DatumType`] enumerates the known tags and [`decode_datum`] shapes a datum
//! into a [`ResultInfo`]. [`decode_response`] walks the
//! `[date][measure][position]` nesting of a full response.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

use crate::error::{Result, RiskError};
use crate::measure::RiskKey;
use crate::priceable::Instrument;
use crate::value::{Cell, ResultInfo, RiskTable};

/// Known `$type` discriminators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatumType {
    Risk,
    RiskVector,
    RiskByClass,
    NumberAndUnit,
    Error,
    Unsupported,
    LegDefinition,
    Message,
    IrpCashflowTable,
    RequireAssets,
}

impl FromStr for DatumType {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Risk" => Ok(DatumType::Risk),
            "RiskVector" => Ok(DatumType::RiskVector),
            "RiskByClass" => Ok(DatumType::RiskByClass),
            "NumberAndUnit" => Ok(DatumType::NumberAndUnit),
            "Error" => Ok(DatumType::Error),
            "Unsupported" => Ok(DatumType::Unsupported),
            "LegDefinition" => Ok(DatumType::LegDefinition),
            "Message" => Ok(DatumType::Message),
            "IRPCashflowTable" => Ok(DatumType::IrpCashflowTable),
            "RequireAssets" => Ok(DatumType::RequireAssets),
            other => Err(RiskError::UnknownResultType(other.to_string())),
        }
    }
}

/// Columns of a decoded `RiskVector`
pub const VECTOR_COLUMNS: [&str; 5] = ["mkt_type", "mkt_asset", "mkt_class", "mkt_point", "mkt_quoting_style"];

const CASHFLOW_VALUE_FIELD: &str = "payAmount";

/// Shape one datum into a result carrying `risk_key`
pub fn decode_datum(datum: &Value, risk_key: &RiskKey, request_id: Option<&str>) -> Result<ResultInfo> {
    let obj = datum
        .as_object()
        .ok_or_else(|| RiskError::MalformedPayload(format!("expected object, got {}", datum)))?;
    let tag = obj
        .get("$type")
        .and_then(Value::as_str)
        .ok_or_else(|| RiskError::MalformedPayload("missing $type".to_string()))?;

    let key = risk_key.clone();
    let result = match tag.parse::<DatumType>()? {
        DatumType::Risk => ResultInfo::float(key, number(obj, "val")?, unit(obj)),
        DatumType::NumberAndUnit => ResultInfo::float(key, number(obj, "value")?, unit(obj)),
        DatumType::RiskVector => ResultInfo::table(key, risk_vector(obj)?, unit(obj)),
        DatumType::RiskByClass => risk_by_class(obj, key)?,
        DatumType::Error => ResultInfo::error_value(
            key,
            obj.get("errorString")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error"),
        ),
        DatumType::Unsupported => ResultInfo::unsupported(key),
        DatumType::Message => ResultInfo::text(
            key,
            obj.get("message").and_then(Value::as_str).unwrap_or_default(),
        ),
        DatumType::LegDefinition => ResultInfo::resolved_instrument(key, leg_definition(obj)?),
        DatumType::IrpCashflowTable => ResultInfo::table(key, cashflow_table(obj)?, unit(obj)),
        DatumType::RequireAssets => ResultInfo::table(key, required_assets(obj)?, None),
    };

    Ok(match request_id {
        Some(id) => result.with_request_id(id),
        None => result,
    })
}

/// Decode a `[date][measure][position]` response
///
/// `key_for(date_index, measure_index)` supplies the provenance of each
/// datum. Every measure array must hold exactly `positions` entries.
pub fn decode_response(
    payload: &Value,
    positions: usize,
    request_id: Option<&str>,
    key_for: impl Fn(usize, usize) -> Result<RiskKey>,
) -> Result<Vec<Vec<Vec<ResultInfo>>>> {
    let dates = array(payload, "response")?;
    let mut out = Vec::with_capacity(dates.len());
    for (di, by_measure) in dates.iter().enumerate() {
        let measures = array(by_measure, "date entry")?;
        let mut decoded_measures = Vec::with_capacity(measures.len());
        for (mi, by_position) in measures.iter().enumerate() {
            let data = array(by_position, "measure entry")?;
            if data.len() != positions {
                return Err(RiskError::MalformedPayload(format!(
                    "expected {} positions for date {} measure {}, got {}",
                    positions,
                    di,
                    mi,
                    data.len()
                )));
            }
            let key = key_for(di, mi)?;
            let decoded = data
                .iter()
                .map(|datum| decode_datum(datum, &key, request_id))
                .collect::<Result<Vec<_>>>()?;
            decoded_measures.push(decoded);
        }
        out.push(decoded_measures);
    }
    debug!(
        "Decoded {} dates x {} positions for request {}",
        out.len(),
        positions,
        request_id.unwrap_or("-")
    );
    Ok(out)
}

fn array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| RiskError::MalformedPayload(format!("{} is not an array", what)))
}

fn number(obj: &Map<String, Value>, field: &str) -> Result<f64> {
    obj.get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| RiskError::MalformedPayload(format!("missing numeric field {}", field)))
}

fn unit(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("unit")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(m) => m.values().next().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn text_cell(obj: &Map<String, Value>, field: &str) -> Cell {
    match obj.get(field) {
        Some(Value::String(s)) => Cell::Text(s.clone()),
        Some(Value::Number(n)) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
        _ => Cell::Empty,
    }
}

fn risk_vector(obj: &Map<String, Value>) -> Result<RiskTable> {
    let values = obj
        .get("asset")
        .and_then(Value::as_array)
        .ok_or_else(|| RiskError::MalformedPayload("RiskVector missing asset".to_string()))?;
    let points = obj
        .get("points")
        .and_then(Value::as_array)
        .ok_or_else(|| RiskError::MalformedPayload("RiskVector missing points".to_string()))?;
    if values.len() != points.len() {
        return Err(RiskError::MalformedPayload(format!(
            "RiskVector has {} values for {} points",
            values.len(),
            points.len()
        )));
    }

    let mut table = RiskTable::new(VECTOR_COLUMNS);
    for (value, point) in values.iter().zip(points) {
        let p = point
            .as_object()
            .ok_or_else(|| RiskError::MalformedPayload("RiskVector point is not an object".to_string()))?;
        let v = value
            .as_f64()
            .ok_or_else(|| RiskError::MalformedPayload("RiskVector value is not numeric".to_string()))?;
        table.push_row(
            vec![
                text_cell(p, "type"),
                text_cell(p, "asset"),
                text_cell(p, "class_"),
                text_cell(p, "point"),
                text_cell(p, "quoteStyle"),
            ],
            v,
        )?;
    }
    Ok(table)
}

fn risk_by_class(obj: &Map<String, Value>, key: RiskKey) -> Result<ResultInfo> {
    let classes = obj
        .get("classes")
        .and_then(Value::as_array)
        .ok_or_else(|| RiskError::MalformedPayload("RiskByClass missing classes".to_string()))?;
    let values = obj
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| RiskError::MalformedPayload("RiskByClass missing values".to_string()))?;
    if classes.len() != values.len() {
        return Err(RiskError::MalformedPayload(
            "RiskByClass classes and values differ in length".to_string(),
        ));
    }

    let values: Vec<f64> = values
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| RiskError::MalformedPayload("RiskByClass value is not numeric".to_string()))
        })
        .collect::<Result<_>>()?;

    if let [single] = values.as_slice() {
        return Ok(ResultInfo::float(key, *single, unit(obj)));
    }

    let mut table = RiskTable::new(["mkt_type", "mkt_asset"]);
    for (class, v) in classes.iter().zip(values) {
        let c = class.as_object().cloned().unwrap_or_default();
        table.push_row(vec![text_cell(&c, "type"), text_cell(&c, "asset")], v)?;
    }
    Ok(ResultInfo::table(key, table, unit(obj)))
}

fn leg_definition(obj: &Map<String, Value>) -> Result<Instrument> {
    let fields = obj
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| RiskError::MalformedPayload("LegDefinition missing fields".to_string()))?;

    let header = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| fields.get(*n).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    };
    let mut instrument = Instrument::new(
        header(&["asset_class", "assetClass"]),
        header(&["type", "instrument_type"]),
    );
    for (k, v) in fields {
        if !matches!(k.as_str(), "asset_class" | "assetClass" | "type" | "instrument_type") {
            instrument.properties.insert(k.clone(), v.clone());
        }
    }
    Ok(instrument)
}

fn cashflow_table(obj: &Map<String, Value>) -> Result<RiskTable> {
    let rows = obj
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| RiskError::MalformedPayload("IRPCashflowTable missing rows".to_string()))?;

    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        if let Some(r) = row.as_object() {
            for k in r.keys() {
                if k != CASHFLOW_VALUE_FIELD && !columns.contains(k) {
                    columns.push(k.clone());
                }
            }
        }
    }

    let mut table = RiskTable::new(columns.clone());
    for row in rows {
        let r = row
            .as_object()
            .ok_or_else(|| RiskError::MalformedPayload("cashflow row is not an object".to_string()))?;
        let cells = columns
            .iter()
            .map(|c| match r.get(c) {
                Some(Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(Cell::Date)
                    .unwrap_or_else(|_| Cell::Text(s.clone())),
                Some(Value::Number(n)) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
                _ => Cell::Empty,
            })
            .collect();
        let value = r.get(CASHFLOW_VALUE_FIELD).and_then(Value::as_f64).unwrap_or(0.0);
        table.push_row(cells, value)?;
    }
    Ok(table)
}

fn required_assets(obj: &Map<String, Value>) -> Result<RiskTable> {
    let assets = obj
        .get("requiredAssets")
        .and_then(Value::as_array)
        .ok_or_else(|| RiskError::MalformedPayload("RequireAssets missing requiredAssets".to_string()))?;
    let mut table = RiskTable::new(["mkt_type", "mkt_asset"]);
    for a in assets {
        let a = a.as_object().cloned().unwrap_or_default();
        table.push_row(vec![text_cell(&a, "type"), text_cell(&a, "asset")], 0.0)?;
    }
    Ok(table)
}
