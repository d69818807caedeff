//! Column schema, edit validation, and column type inference.
//!
//! A [`Schema`] is the ordered `column -> ColumnType` table captured at
//! ingestion time. It never changes afterwards; every proposed cell edit is
//! checked against it through [`Schema::validate`], which coerces the raw
//! request value into a [`Scalar`] or explains why it cannot be stored.

use std::{fmt, str::FromStr};

use anyhow::anyhow;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::data::{Scalar, parse_temporal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Boolean,
    String,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
            ColumnType::Date => "date",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &["number", "boolean", "string", "date"]
    }

    /// Coerces a non-null request value into this column type.
    fn coerce(self, raw: &JsonValue) -> Option<Scalar> {
        match self {
            ColumnType::Number => coerce_number(raw),
            ColumnType::Boolean => coerce_boolean(raw),
            ColumnType::String => Some(coerce_string(raw)),
            ColumnType::Date => coerce_date(raw),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "number" | "integer" | "int" | "float" | "double" => Ok(ColumnType::Number),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "string" | "text" => Ok(ColumnType::String),
            "date" | "datetime" | "timestamp" => Ok(ColumnType::Date),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

fn coerce_number(raw: &JsonValue) -> Option<Scalar> {
    match raw {
        JsonValue::Number(_) => Scalar::from_json(raw),
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|parsed| parsed.is_finite())
            .map(Scalar::Float),
        _ => None,
    }
}

fn coerce_boolean(raw: &JsonValue) -> Option<Scalar> {
    match raw {
        JsonValue::Bool(b) => Some(Scalar::Bool(*b)),
        JsonValue::String(s) => {
            let lowered = s.to_lowercase();
            Some(Scalar::Bool(matches!(lowered.as_str(), "true" | "1" | "yes")))
        }
        _ => None,
    }
}

fn coerce_string(raw: &JsonValue) -> Scalar {
    match raw {
        JsonValue::String(s) => Scalar::String(s.clone()),
        other => Scalar::String(other.to_string()),
    }
}

// Dates are stored as the caller wrote them; no calendar check.
fn coerce_date(raw: &JsonValue) -> Option<Scalar> {
    match raw {
        JsonValue::String(s) => Some(Scalar::String(s.clone())),
        JsonValue::Number(n) => Some(Scalar::String(n.to_string())),
        JsonValue::Bool(b) => Some(Scalar::String(b.to_string())),
        _ => None,
    }
}

/// Why an edit value was refused. Row identity is added by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownColumn(String),
    InvalidValue {
        column: String,
        value: String,
        expected: ColumnType,
    },
}

impl Rejection {
    pub fn describe(&self, row: usize) -> String {
        match self {
            Rejection::UnknownColumn(column) => {
                format!("row {row}: unknown column '{column}'")
            }
            Rejection::InvalidValue { column, .. } => format!("row {row}, column '{column}': {self}"),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnknownColumn(column) => write!(f, "unknown column '{column}'"),
            Rejection::InvalidValue {
                value, expected, ..
            } => write!(f, "invalid value '{value}' for type '{expected}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    Accepted(Scalar),
    Rejected(Rejection),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    columns: IndexMap<String, ColumnType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, ty: ColumnType) {
        self.columns.insert(name.into(), ty);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    /// Checks a proposed cell value against the declared column type.
    ///
    /// `null` is always accepted for a known column so a cell can be cleared.
    pub fn validate(&self, column: &str, raw: &JsonValue) -> Coercion {
        let Some(expected) = self.column_type(column) else {
            return Coercion::Rejected(Rejection::UnknownColumn(column.to_string()));
        };
        if raw.is_null() {
            return Coercion::Accepted(Scalar::Null);
        }
        match expected.coerce(raw) {
            Some(value) => Coercion::Accepted(value),
            None => Coercion::Rejected(Rejection::InvalidValue {
                column: column.to_string(),
                value: display_raw(raw),
                expected,
            }),
        }
    }
}

fn display_raw(raw: &JsonValue) -> String {
    match raw {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tokens that stand for "no value" in exported spreadsheets.
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lowered = trimmed.to_ascii_lowercase();
    matches!(
        lowered.as_str(),
        "na" | "n/a" | "nan" | "null" | "none" | "#n/a"
    ) || lowered.chars().all(|c| c == '-')
}

pub fn is_boolean_token(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "false" | "t" | "f" | "yes" | "no" | "y" | "n"
    )
}

pub fn parse_boolean_token(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

pub fn is_number_token(value: &str) -> bool {
    value.parse::<i64>().is_ok() || value.parse::<f64>().is_ok_and(|f| f.is_finite())
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    non_empty: usize,
    possible_boolean: bool,
    possible_number: bool,
    possible_date: bool,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            non_empty: 0,
            possible_boolean: true,
            possible_number: true,
            possible_date: true,
        }
    }

    fn update(&mut self, value: &str) {
        if is_placeholder(value) {
            return;
        }
        let trimmed = value.trim();
        self.non_empty += 1;
        if self.possible_boolean && !is_boolean_token(trimmed) {
            self.possible_boolean = false;
        }
        if self.possible_number && !is_number_token(trimmed) {
            self.possible_number = false;
        }
        if self.possible_date && parse_temporal(trimmed).is_none() {
            self.possible_date = false;
        }
    }

    fn decide(&self) -> ColumnType {
        if self.non_empty == 0 {
            ColumnType::String
        } else if self.possible_boolean {
            ColumnType::Boolean
        } else if self.possible_number {
            ColumnType::Number
        } else if self.possible_date {
            ColumnType::Date
        } else {
            ColumnType::String
        }
    }
}

/// Infers a column type from its textual cells; placeholders are ignored.
pub fn infer_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate = TypeCandidate::new();
    for value in values {
        candidate.update(value);
    }
    candidate.decide()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::from_columns([
            ("age", ColumnType::Number),
            ("active", ColumnType::Boolean),
            ("name", ColumnType::String),
            ("joined", ColumnType::Date),
        ])
    }

    #[test]
    fn unknown_column_is_rejected_even_for_null() {
        let outcome = schema().validate("salary", &JsonValue::Null);
        assert_eq!(
            outcome,
            Coercion::Rejected(Rejection::UnknownColumn("salary".to_string()))
        );
    }

    #[test]
    fn null_clears_any_known_column() {
        for column in ["age", "active", "name", "joined"] {
            assert_eq!(
                schema().validate(column, &JsonValue::Null),
                Coercion::Accepted(Scalar::Null)
            );
        }
    }

    #[test]
    fn number_accepts_numeric_strings_and_numbers() {
        let s = schema();
        assert_eq!(s.validate("age", &json!("31")), Coercion::Accepted(Scalar::Float(31.0)));
        assert_eq!(s.validate("age", &json!(" 2.5 ")), Coercion::Accepted(Scalar::Float(2.5)));
        assert_eq!(s.validate("age", &json!(7)), Coercion::Accepted(Scalar::Integer(7)));
        assert!(matches!(s.validate("age", &json!("abc")), Coercion::Rejected(_)));
        assert!(matches!(s.validate("age", &json!("NaN")), Coercion::Rejected(_)));
        assert!(matches!(s.validate("age", &json!(true)), Coercion::Rejected(_)));
        assert!(matches!(s.validate("age", &json!([1])), Coercion::Rejected(_)));
    }

    #[test]
    fn boolean_maps_strings_and_rejects_numbers() {
        let s = schema();
        assert_eq!(s.validate("active", &json!("YES")), Coercion::Accepted(Scalar::Bool(true)));
        assert_eq!(s.validate("active", &json!("1")), Coercion::Accepted(Scalar::Bool(true)));
        assert_eq!(s.validate("active", &json!("nope")), Coercion::Accepted(Scalar::Bool(false)));
        assert_eq!(s.validate("active", &json!(false)), Coercion::Accepted(Scalar::Bool(false)));
        assert!(matches!(s.validate("active", &json!(1)), Coercion::Rejected(_)));
    }

    #[test]
    fn string_stringifies_everything() {
        let s = schema();
        assert_eq!(s.validate("name", &json!(42)), Coercion::Accepted(Scalar::from("42")));
        assert_eq!(s.validate("name", &json!(true)), Coercion::Accepted(Scalar::from("true")));
        assert_eq!(s.validate("name", &json!("Ada")), Coercion::Accepted(Scalar::from("Ada")));
    }

    #[test]
    fn date_is_permissive_for_scalars() {
        let s = schema();
        assert_eq!(
            s.validate("joined", &json!("not really a date")),
            Coercion::Accepted(Scalar::from("not really a date"))
        );
        assert!(matches!(s.validate("joined", &json!({"y": 2024})), Coercion::Rejected(_)));
    }

    #[test]
    fn rejection_reason_names_row_column_value_and_type() {
        let Coercion::Rejected(reason) = schema().validate("age", &json!("abc")) else {
            panic!("expected rejection");
        };
        assert_eq!(
            reason.describe(4),
            "row 4, column 'age': invalid value 'abc' for type 'number'"
        );
    }

    #[test]
    fn schema_serializes_as_ordered_object() {
        let json = serde_json::to_string(&schema()).unwrap();
        assert_eq!(
            json,
            r#"{"age":"number","active":"boolean","name":"string","joined":"date"}"#
        );
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema());
    }

    #[test]
    fn infer_type_follows_candidate_order() {
        assert_eq!(infer_type(["yes", "no", ""]), ColumnType::Boolean);
        assert_eq!(infer_type(["1", "2.5", "NA"]), ColumnType::Number);
        assert_eq!(infer_type(["2024-01-01", "2024-02-01"]), ColumnType::Date);
        assert_eq!(infer_type(["1", "x"]), ColumnType::String);
        assert_eq!(infer_type(["", "n/a"]), ColumnType::String);
    }

    #[test]
    fn column_type_parses_aliases() {
        assert_eq!("Integer".parse::<ColumnType>().unwrap(), ColumnType::Number);
        assert_eq!("bool".parse::<ColumnType>().unwrap(), ColumnType::Boolean);
        assert!("guid".parse::<ColumnType>().is_err());
    }
}
