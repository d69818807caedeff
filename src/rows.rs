//! Row types and the sanitizer that turns parser rows into storable rows.
//!
//! Rows are insertion-ordered maps so column order survives persistence and
//! every view returns columns the way the source file declared them.

use indexmap::IndexMap;

use crate::data::{RawValue, Scalar, canonicalize};

/// Row exactly as a parser produced it.
pub type RawRow = IndexMap<String, RawValue>;

/// JSON-safe row, as stored in a Table and returned by views.
pub type Row = IndexMap<String, Scalar>;

pub fn sanitize_row(raw: &RawRow) -> Row {
    raw.iter()
        .map(|(column, value)| (column.clone(), canonicalize(value)))
        .collect()
}

pub fn sanitize_rows(rows: &[RawRow]) -> Vec<Row> {
    rows.iter().map(sanitize_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(pairs: Vec<(&str, RawValue)>) -> RawRow {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn sanitize_preserves_key_and_row_order() {
        let rows = vec![
            raw(vec![
                ("zeta", RawValue::Integer(1)),
                ("alpha", RawValue::Float(f64::NAN)),
                (
                    "when",
                    RawValue::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
                ),
            ]),
            raw(vec![
                ("zeta", RawValue::Integer(2)),
                ("alpha", RawValue::Missing),
                ("when", RawValue::Text("later".to_string())),
            ]),
        ];

        let sanitized = sanitize_rows(&rows);
        assert_eq!(sanitized.len(), 2);
        let keys: Vec<&str> = sanitized[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "when"]);
        assert_eq!(sanitized[0]["alpha"], Scalar::Null);
        assert_eq!(sanitized[0]["when"], Scalar::from("2024-01-02"));
        assert_eq!(sanitized[1]["zeta"], Scalar::Integer(2));
    }

    #[test]
    fn sanitize_is_deterministic() {
        let rows = vec![raw(vec![
            ("a", RawValue::Float(1.5)),
            ("b", RawValue::Boolean(false)),
        ])];
        assert_eq!(sanitize_rows(&rows), sanitize_rows(&rows));
    }
}
