//! Cell values: what parsers hand us and what we are willing to store.
//!
//! [`RawValue`] is a parser-native cell (missing markers, timestamps, boxed
//! decimals, non-finite floats). [`Scalar`] is the JSON-safe cell that every
//! stored row and every overlay entry is made of. [`canonicalize`] is the
//! only bridge between them and never fails: anything that cannot be
//! expressed as a JSON scalar degrades to [`Scalar::Null`].

use std::fmt;

use anyhow::{Result, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Missing,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<FixedOffset>),
}

/// JSON-safe cell value.
///
/// Numbers keep their integer-ness so `30` round-trips as `30`, but equality
/// compares numerically so `Integer(31) == Float(31.0)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::String(a), Scalar::String(b)) => a == b,
            (Scalar::Integer(a), Scalar::Integer(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a == b,
            (Scalar::Integer(a), Scalar::Float(b)) | (Scalar::Float(b), Scalar::Integer(a)) => {
                *a as f64 == *b
            }
            _ => false,
        }
    }
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Finite floats only; NaN and infinities are not JSON.
    pub fn float(value: f64) -> Scalar {
        if value.is_finite() {
            Scalar::Float(value)
        } else {
            Scalar::Null
        }
    }

    /// Converts a JSON value, returning `None` for arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Scalar> {
        match value {
            serde_json::Value::Null => Some(Scalar::Null),
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Scalar::Integer(i),
                None => n.as_f64().map(Scalar::float).unwrap_or(Scalar::Null),
            }),
            serde_json::Value::String(s) => Some(Scalar::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Null => serde_json::Value::Null,
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
            Scalar::Integer(i) => serde_json::Value::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Scalar::String(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Scalar::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

pub fn canonicalize(value: &RawValue) -> Scalar {
    match value {
        RawValue::Missing => Scalar::Null,
        RawValue::Boolean(b) => Scalar::Bool(*b),
        RawValue::Integer(i) => Scalar::Integer(*i),
        RawValue::Float(f) => Scalar::float(*f),
        RawValue::Decimal(d) => unwrap_decimal(d),
        RawValue::Text(s) => Scalar::String(s.clone()),
        RawValue::Date(d) => Scalar::String(d.format("%Y-%m-%d").to_string()),
        RawValue::DateTime(dt) => {
            Scalar::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        RawValue::Timestamp(ts) => Scalar::String(ts.to_rfc3339()),
    }
}

fn unwrap_decimal(value: &Decimal) -> Scalar {
    let unwrapped = if value.scale() == 0 {
        value.to_i64().map(Scalar::Integer)
    } else {
        value.to_f64().map(Scalar::float)
    };
    unwrapped.unwrap_or(Scalar::Null)
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).map_err(|_| anyhow!("Failed to parse '{value}' as timestamp"))
}

/// Parses any supported date-like text into the most specific raw value.
pub fn parse_temporal(value: &str) -> Option<RawValue> {
    if let Ok(ts) = parse_timestamp(value) {
        return Some(RawValue::Timestamp(ts));
    }
    if let Ok(dt) = parse_naive_datetime(value) {
        return Some(RawValue::DateTime(dt));
    }
    parse_naive_date(value).ok().map(RawValue::Date)
}
