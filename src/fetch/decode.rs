use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use super::models::{Candle, FailureKind};

/// Rows carry at least open time, open, high, low and close; anything after that is ignored.
pub const KLINE_LEADING_FIELDS: usize = 5;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("{0}")]
    Malformed(String),
    #[error("field `{field}` has non-numeric value `{value}`")]
    InvalidNumber { field: &'static str, value: String },
}

impl DecodeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DecodeError::Malformed(_) => FailureKind::MalformedPayload,
            DecodeError::InvalidNumber { .. } => FailureKind::InvalidNumber,
        }
    }
}

/// Decode a kline page (`[[openTime, "open", "high", "low", "close", ...], ...]`).
pub fn decode_kline_page(root: &Value) -> Result<Vec<Candle>, DecodeError> {
    let rows = root.as_array().ok_or_else(|| {
        DecodeError::Malformed(format!(
            "expected an array of kline rows, found {}",
            value_kind(root)
        ))
    })?;

    rows.iter()
        .enumerate()
        .map(|(idx, row)| decode_kline_row(row).map_err(|err| annotate_row(idx, err)))
        .collect()
}

pub fn decode_kline_row(row: &Value) -> Result<Candle, DecodeError> {
    let fields = row
        .as_array()
        .ok_or_else(|| DecodeError::Malformed(format!("row is {}, not an array", value_kind(row))))?;

    if fields.len() < KLINE_LEADING_FIELDS {
        return Err(DecodeError::Malformed(format!(
            "row has {} fields, expected at least {}",
            fields.len(),
            KLINE_LEADING_FIELDS
        )));
    }

    let timestamp = parse_open_time(&fields[0])?;
    let open = parse_price("open", &fields[1])?;
    let high = parse_price("high", &fields[2])?;
    let low = parse_price("low", &fields[3])?;
    let close = parse_price("close", &fields[4])?;

    Ok(Candle::new(timestamp, open, high, low, close))
}

fn parse_open_time(value: &Value) -> Result<DateTime<Utc>, DecodeError> {
    let millis = match value {
        Value::Number(num) => num.as_i64(),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| DecodeError::InvalidNumber {
        field: "open_time",
        value: value_to_string(value),
    })?;

    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        DecodeError::Malformed(format!("open time {millis} is outside the supported range"))
    })
}

fn parse_price(field: &'static str, value: &Value) -> Result<f64, DecodeError> {
    let parsed = match value {
        Value::Number(num) => num.as_f64(),
        Value::String(raw) => parse_f64(raw.trim()),
        _ => None,
    };

    parsed
        .filter(|number| number.is_finite())
        .ok_or_else(|| DecodeError::InvalidNumber {
            field,
            value: value_to_string(value),
        })
}

pub fn parse_f64(value: &str) -> Option<f64> {
    value.parse::<f64>().ok()
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn annotate_row(idx: usize, err: DecodeError) -> DecodeError {
    match err {
        DecodeError::Malformed(reason) => DecodeError::Malformed(format!("row {idx}: {reason}")),
        other => other,
    }
}
