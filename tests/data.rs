use chrono::{DateTime, NaiveDate};
use csv_overlay::{
    data::{RawValue, Scalar, canonicalize},
    rows::{RawRow, sanitize_rows},
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value;

fn raw_value_strategy() -> impl Strategy<Value = RawValue> {
    prop_oneof![
        Just(RawValue::Missing),
        any::<bool>().prop_map(RawValue::Boolean),
        any::<i64>().prop_map(RawValue::Integer),
        any::<f64>().prop_map(RawValue::Float),
        (any::<i64>(), 0u32..=28).prop_map(|(mantissa, scale)| {
            RawValue::Decimal(Decimal::new(mantissa, scale))
        }),
        ".{0,16}".prop_map(RawValue::Text),
        (1i32..=9999, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| {
            RawValue::Date(NaiveDate::from_ymd_opt(y, m, d).expect("valid date"))
        }),
        (0i64..4_102_444_800).prop_map(|secs| {
            RawValue::DateTime(
                DateTime::from_timestamp(secs, 0)
                    .expect("in range")
                    .naive_utc(),
            )
        }),
    ]
}

fn is_json_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

proptest! {
    #[test]
    fn canonicalized_values_always_serialize_as_json_scalars(raw in raw_value_strategy()) {
        let scalar = canonicalize(&raw);
        let json = serde_json::to_value(&scalar).expect("serializable");
        prop_assert!(is_json_scalar(&json));
        if let Scalar::Float(f) = scalar {
            prop_assert!(f.is_finite());
        }
    }

    #[test]
    fn sanitize_preserves_row_order_and_keys(values in proptest::collection::vec(raw_value_strategy(), 0..20)) {
        let rows: Vec<RawRow> = values
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                [("b".to_string(), value.clone()), ("a".to_string(), RawValue::Integer(idx as i64))]
                    .into_iter()
                    .collect()
            })
            .collect();
        let sanitized = sanitize_rows(&rows);
        prop_assert_eq!(sanitized.len(), rows.len());
        for (idx, row) in sanitized.iter().enumerate() {
            prop_assert_eq!(row.keys().collect::<Vec<_>>(), vec!["b", "a"]);
            prop_assert_eq!(&row["a"], &Scalar::Integer(idx as i64));
        }
        prop_assert_eq!(sanitize_rows(&rows), sanitized);
    }
}

#[test]
fn boxed_decimals_unwrap_to_plain_numbers() {
    assert_eq!(
        canonicalize(&RawValue::Decimal(Decimal::new(42, 0))),
        Scalar::Integer(42)
    );
    assert_eq!(
        canonicalize(&RawValue::Decimal(Decimal::new(125, 1))),
        Scalar::Float(12.5)
    );
}

#[test]
fn scalars_compare_numerically_across_integer_and_float() {
    assert_eq!(Scalar::Integer(31), Scalar::Float(31.0));
    assert_ne!(Scalar::Integer(31), Scalar::from("31"));
}
