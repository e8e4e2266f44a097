//! Coercion of native Druid values into domain values
//!
//! Druid returns result values as JSON. Each value is coerced according to
//! the domain type of its column; JSON `null` is [`Value::Null`] regardless
//! of the column type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::types::{DomainType, Value};

/// Coerce one native value into the given domain type
pub fn coerce_value(native: &Json, data_type: DomainType) -> Result<Value> {
    if native.is_null() {
        return Ok(Value::Null);
    }

    let value = match data_type {
        DomainType::Boolean => Value::Bool(to_bool(native)?),
        DomainType::Byte => Value::Int8(narrow(native, data_type)?),
        DomainType::SmallInt => Value::Int16(narrow(native, data_type)?),
        DomainType::Int => Value::Int32(narrow(native, data_type)?),
        DomainType::BigInt => Value::Int64(to_i64(native, data_type)?),
        DomainType::Float => Value::Float32(to_f64(native, data_type)? as f32),
        DomainType::Double => Value::Float64(to_f64(native, data_type)?),
        DomainType::String => Value::String(to_string(native)),
        DomainType::Timestamp => Value::DateTime(to_timestamp(native)?),
    };

    Ok(value)
}

fn mismatch(native: &Json, data_type: DomainType) -> Error {
    Error::type_conversion(format!("cannot read {} as {}", native, data_type))
}

fn to_bool(native: &Json) -> Result<bool> {
    match native {
        Json::Bool(b) => Ok(*b),
        // Druid encodes boolean expressions as LONG 1/0
        Json::Number(n) => n
            .as_i64()
            .map(|n| n != 0)
            .ok_or_else(|| mismatch(native, DomainType::Boolean)),
        Json::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(mismatch(native, DomainType::Boolean)),
        },
        _ => Err(mismatch(native, DomainType::Boolean)),
    }
}

/// 2^63; `i64::MAX as f64` rounds up to this value
const I64_UPPER_EXCLUSIVE: f64 = 9_223_372_036_854_775_808.0;

fn to_i64(native: &Json, data_type: DomainType) -> Result<i64> {
    match native {
        Json::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| {
                        f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < I64_UPPER_EXCLUSIVE
                    })
                    .map(|f| f as i64)
            })
            .ok_or_else(|| mismatch(native, data_type)),
        Json::String(s) => s.trim().parse().map_err(|_| mismatch(native, data_type)),
        Json::Bool(b) => Ok(i64::from(*b)),
        _ => Err(mismatch(native, data_type)),
    }
}

fn narrow<T: TryFrom<i64>>(native: &Json, data_type: DomainType) -> Result<T> {
    let wide = to_i64(native, data_type)?;
    T::try_from(wide).map_err(|_| {
        Error::type_conversion(format!("{} is out of range for {}", wide, data_type))
    })
}

fn to_f64(native: &Json, data_type: DomainType) -> Result<f64> {
    match native {
        Json::Number(n) => n.as_f64().ok_or_else(|| mismatch(native, data_type)),
        // NaN and infinities arrive as strings
        Json::String(s) => s.trim().parse().map_err(|_| mismatch(native, data_type)),
        _ => Err(mismatch(native, data_type)),
    }
}

fn to_string(native: &Json) -> String {
    match native {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_timestamp(native: &Json) -> Result<NaiveDateTime> {
    match native {
        Json::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| mismatch(native, DomainType::Timestamp)),
        Json::String(s) => {
            parse_timestamp(s).ok_or_else(|| mismatch(native, DomainType::Timestamp))
        }
        _ => Err(mismatch(native, DomainType::Timestamp)),
    }
}

/// Parse a timestamp string into a civil date-time in UTC.
///
/// Accepts RFC 3339 (any offset, converted to UTC), `YYYY-MM-DD HH:MM:SS[.f]`,
/// `YYYY-MM-DDTHH:MM:SS[.f]` (taken as UTC), and `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL_TYPES: [DomainType; 9] = [
        DomainType::Boolean,
        DomainType::Byte,
        DomainType::SmallInt,
        DomainType::Int,
        DomainType::BigInt,
        DomainType::Float,
        DomainType::Double,
        DomainType::String,
        DomainType::Timestamp,
    ];

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_milli_opt(h, min, s, ms)
            .unwrap()
    }

    #[test]
    fn test_null_is_null_for_every_type() {
        for t in ALL_TYPES {
            assert_eq!(coerce_value(&Json::Null, t).unwrap(), Value::Null, "{t}");
        }
    }

    #[test]
    fn test_boolean() {
        assert_eq!(
            coerce_value(&json!(true), DomainType::Boolean).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            coerce_value(&json!(0), DomainType::Boolean).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            coerce_value(&json!("TRUE"), DomainType::Boolean).unwrap(),
            Value::Bool(true)
        );
        assert!(coerce_value(&json!("maybe"), DomainType::Boolean).is_err());
    }

    #[test]
    fn test_integers() {
        assert_eq!(
            coerce_value(&json!(-7), DomainType::Byte).unwrap(),
            Value::Int8(-7)
        );
        assert_eq!(
            coerce_value(&json!(1234), DomainType::SmallInt).unwrap(),
            Value::Int16(1234)
        );
        assert_eq!(
            coerce_value(&json!(70000), DomainType::Int).unwrap(),
            Value::Int32(70000)
        );
        assert_eq!(
            coerce_value(&json!(9_000_000_000_i64), DomainType::BigInt).unwrap(),
            Value::Int64(9_000_000_000)
        );
        assert_eq!(
            coerce_value(&json!("42"), DomainType::BigInt).unwrap(),
            Value::Int64(42)
        );
    }

    #[test]
    fn test_integer_out_of_range() {
        let err = coerce_value(&json!(300), DomainType::Byte).unwrap_err();
        assert!(matches!(err, Error::TypeConversion { .. }));
        assert!(coerce_value(&json!(40000), DomainType::SmallInt).is_err());
        assert!(coerce_value(&json!(3_000_000_000_i64), DomainType::Int).is_err());
        assert!(coerce_value(&json!(1.5), DomainType::BigInt).is_err());
    }

    #[test]
    fn test_bigint_just_above_range_is_rejected() {
        let above: Json = serde_json::from_str("9223372036854775808").unwrap();
        let err = coerce_value(&above, DomainType::BigInt).unwrap_err();
        assert!(matches!(err, Error::TypeConversion { .. }));

        let as_float: Json = serde_json::from_str("9223372036854775808.0").unwrap();
        assert!(coerce_value(&as_float, DomainType::BigInt).is_err());

        let max: Json = serde_json::from_str("9223372036854775807").unwrap();
        assert_eq!(
            coerce_value(&max, DomainType::BigInt).unwrap(),
            Value::Int64(i64::MAX)
        );
        assert_eq!(
            coerce_value(&json!(-9.223372036854775808e18), DomainType::BigInt).unwrap(),
            Value::Int64(i64::MIN)
        );
    }

    #[test]
    fn test_floats() {
        assert_eq!(
            coerce_value(&json!(1.5), DomainType::Float).unwrap(),
            Value::Float32(1.5)
        );
        assert_eq!(
            coerce_value(&json!(2), DomainType::Double).unwrap(),
            Value::Float64(2.0)
        );
        match coerce_value(&json!("NaN"), DomainType::Double).unwrap() {
            Value::Float64(f) => assert!(f.is_nan()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(coerce_value(&json!("abc"), DomainType::Double).is_err());
    }

    #[test]
    fn test_string() {
        assert_eq!(
            coerce_value(&json!("Main_Page"), DomainType::String).unwrap(),
            Value::String("Main_Page".into())
        );
        assert_eq!(
            coerce_value(&json!(12), DomainType::String).unwrap(),
            Value::String("12".into())
        );
        assert_eq!(
            coerce_value(&json!(["a", "b"]), DomainType::String).unwrap(),
            Value::String("[\"a\",\"b\"]".into())
        );
    }

    #[test]
    fn test_timestamp_rfc3339_is_utc() {
        assert_eq!(
            coerce_value(&json!("2023-01-01T00:00:00.000Z"), DomainType::Timestamp).unwrap(),
            Value::DateTime(utc(2023, 1, 1, 0, 0, 0, 0))
        );
        // Offsets are normalised into UTC
        assert_eq!(
            coerce_value(&json!("2023-01-01T02:30:00+02:00"), DomainType::Timestamp).unwrap(),
            Value::DateTime(utc(2023, 1, 1, 0, 30, 0, 0))
        );
    }

    #[test]
    fn test_timestamp_epoch_millis() {
        assert_eq!(
            coerce_value(&json!(1_672_531_200_123_i64), DomainType::Timestamp).unwrap(),
            Value::DateTime(utc(2023, 1, 1, 0, 0, 0, 123))
        );
    }

    #[test]
    fn test_timestamp_civil_forms() {
        assert_eq!(
            parse_timestamp("2023-06-15 08:09:10.5"),
            Some(utc(2023, 6, 15, 8, 9, 10, 500))
        );
        assert_eq!(parse_timestamp("2023-06-15"), Some(utc(2023, 6, 15, 0, 0, 0, 0)));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert!(coerce_value(&json!(true), DomainType::Timestamp).is_err());
    }
}
