//! Typed cell values and the coercion of raw source text into them.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::schema::ColumnType;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A single target cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Date view of the value; datetimes are truncated to their date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(date) => Some(*date),
            Value::DateTime(datetime) => Some(datetime.date()),
            _ => None,
        }
    }

    /// Text rendering used by file sinks, digests and reports. `Null` renders empty.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(value) => value.to_string(),
            Value::Float(value) => value.to_string(),
            Value::Text(value) => value.clone(),
            Value::Date(date) => date.format("%Y-%m-%d").to_string(),
            Value::DateTime(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        }
    }

    /// Parses trimmed, non-empty raw text as the given column type.
    pub fn parse_as(raw: &str, column_type: ColumnType) -> Result<Self> {
        let trimmed = raw.trim();
        let fail = |message: &str| ModelError::Coercion {
            raw: raw.to_string(),
            column_type,
            message: message.to_string(),
        };
        match column_type {
            ColumnType::Integer | ColumnType::Concept => parse_integer(trimmed)
                .map(Value::Integer)
                .ok_or_else(|| fail("not an integer")),
            ColumnType::Float => trimmed
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Value::Float)
                .ok_or_else(|| fail("not a number")),
            ColumnType::Text => Ok(Value::Text(trimmed.to_string())),
            ColumnType::Date => parse_date(trimmed)
                .map(Value::Date)
                .ok_or_else(|| fail("not a date (expected YYYY-MM-DD)")),
            ColumnType::DateTime => parse_datetime(trimmed)
                .map(Value::DateTime)
                .ok_or_else(|| fail("not a datetime (expected YYYY-MM-DDTHH:MM:SS)")),
        }
    }

    /// Re-types an already computed value for a target column.
    pub fn convert_to(self, column_type: ColumnType) -> Result<Self> {
        match (self, column_type) {
            (Value::Null, _) => Ok(Value::Null),
            (value @ Value::Integer(_), ColumnType::Integer | ColumnType::Concept) => Ok(value),
            (Value::Integer(value), ColumnType::Float) => Ok(Value::Float(value as f64)),
            (value @ Value::Float(_), ColumnType::Float) => Ok(value),
            (value @ Value::Date(_), ColumnType::Date) => Ok(value),
            (Value::DateTime(datetime), ColumnType::Date) => Ok(Value::Date(datetime.date())),
            (Value::Date(date), ColumnType::DateTime) => {
                Ok(Value::DateTime(date.and_time(NaiveTime::MIN)))
            }
            (value @ Value::DateTime(_), ColumnType::DateTime) => Ok(value),
            (value, ColumnType::Text) => Ok(Value::Text(value.render())),
            (value, column_type) => Value::parse_as(&value.render(), column_type),
        }
    }

    /// Orders two values of compatible types; `None` for nulls or mismatched kinds.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::DateTime(b)) => Some(a.and_time(NaiveTime::MIN).cmp(b)),
            (Value::DateTime(a), Value::Date(b)) => Some(a.cmp(&b.and_time(NaiveTime::MIN))),
            _ => None,
        }
    }
}

fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    // Statistical exports write whole numbers as "12.0".
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Parses an ISO-style date; a datetime string yields its date part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| parse_datetime_only(raw).map(|datetime| datetime.date()))
}

/// Parses an ISO-style datetime; a bare date is taken at midnight.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    parse_datetime_only(raw).or_else(|| {
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
            .map(|date| date.and_time(NaiveTime::MIN))
    })
}

fn parse_datetime_only(raw: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}
