//! Coercion of model-supplied JSON into typed column values

use super::value::FieldValue;
use crate::error::FieldIssue;
use crate::registry::{ColumnSpec, ColumnType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

const TRUTHY: [&str; 4] = ["true", "1", "yes", "y"];

/// Coerce `value` to the column's declared type.
pub fn coerce(column: &ColumnSpec, value: &Value) -> Result<FieldValue, FieldIssue> {
    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    convert(column.ty, value).map_err(|reason| FieldIssue::Invalid {
        field: column.name.to_string(),
        value: display_raw(value),
        reason,
    })
}

fn display_raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn convert(ty: ColumnType, value: &Value) -> Result<FieldValue, String> {
    match ty {
        ColumnType::Numeric => parse_decimal(value).map(FieldValue::Numeric),
        ColumnType::Integer => parse_integer(value).map(FieldValue::Integer),
        ColumnType::Boolean => Ok(FieldValue::Boolean(parse_bool(value))),
        ColumnType::Date => parse_date(value).map(FieldValue::Date),
        ColumnType::Timestamp => parse_timestamp(value).map(FieldValue::Timestamp),
        ColumnType::Uuid => match value {
            Value::String(s) => Uuid::parse_str(s.trim())
                .map(FieldValue::Uuid)
                .map_err(|e| e.to_string()),
            _ => Err("expected a UUID string".to_string()),
        },
        ColumnType::Text => match value {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            _ => Err("expected a string".to_string()),
        },
        ColumnType::TextArray => match value {
            Value::Array(items) => Ok(FieldValue::TextArray(
                items.iter().filter(|v| !v.is_null()).map(display_raw).collect(),
            )),
            Value::String(s) => Ok(FieldValue::TextArray(vec![s.clone()])),
            _ => Err("expected a list of strings".to_string()),
        },
    }
}

fn parse_decimal(value: &Value) -> Result<Decimal, String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err("expected a number".to_string()),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| "not a decimal number".to_string())
}

fn parse_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| "expected a whole number".to_string()),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| "expected a whole number".to_string()),
        _ => Err("expected a whole number".to_string()),
    }
}

fn parse_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => TRUTHY.contains(&s.trim().to_lowercase().as_str()),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    }
}

fn parse_date(value: &Value) -> Result<NaiveDate, String> {
    let Value::String(raw) = value else {
        return Err("expected an ISO date (YYYY-MM-DD)".to_string());
    };
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| parse_timestamp(value).map(|t| t.date_naive()))
        .map_err(|_| "expected an ISO date (YYYY-MM-DD)".to_string())
}

fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    let Value::String(raw) = value else {
        return Err("expected an ISO timestamp".to_string());
    };
    let raw = raw.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| "expected an ISO timestamp".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn col(name: &'static str, ty: ColumnType) -> ColumnSpec {
        ColumnSpec::optional(name, ty)
    }

    #[test]
    fn test_numeric_from_string_and_number() {
        let amount = col("amount", ColumnType::Numeric);
        assert_eq!(
            coerce(&amount, &json!("500")).unwrap(),
            FieldValue::Numeric(Decimal::from(500))
        );
        assert_eq!(
            coerce(&amount, &json!(80000)).unwrap(),
            FieldValue::Numeric(Decimal::from(80000))
        );
        assert_eq!(
            coerce(&amount, &json!(12.5)).unwrap(),
            FieldValue::Numeric(Decimal::from_str("12.5").unwrap())
        );
    }

    #[test]
    fn test_invalid_numeric_names_value_and_column() {
        let amount = col("amount", ColumnType::Numeric);
        let issue = coerce(&amount, &json!("abc")).unwrap_err();
        let message = issue.to_string();
        assert!(message.starts_with("Invalid value 'abc' for column 'amount'"));
    }

    #[test]
    fn test_truthy_strings() {
        let flag = col("is_recurring", ColumnType::Boolean);
        for raw in ["true", "1", "YES", " y "] {
            assert_eq!(coerce(&flag, &json!(raw)).unwrap(), FieldValue::Boolean(true));
        }
        for raw in ["false", "no", "0", "maybe"] {
            assert_eq!(coerce(&flag, &json!(raw)).unwrap(), FieldValue::Boolean(false));
        }
        assert_eq!(coerce(&flag, &json!(true)).unwrap(), FieldValue::Boolean(true));
    }

    #[test]
    fn test_dates_and_timestamps() {
        let date = col("date", ColumnType::Date);
        assert_eq!(
            coerce(&date, &json!("2024-03-01")).unwrap(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(
            coerce(&date, &json!("2024-03-01T10:30:00")).unwrap(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert!(coerce(&date, &json!("01/03/2024")).is_err());

        let ts = col("sent_at", ColumnType::Timestamp);
        match coerce(&ts, &json!("2024-03-01T10:30:00+05:30")).unwrap() {
            FieldValue::Timestamp(t) => assert_eq!(t.to_rfc3339(), "2024-03-01T05:00:00+00:00"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_uuid_and_null() {
        let client = col("client_id", ColumnType::Uuid);
        let id = Uuid::new_v4();
        assert_eq!(
            coerce(&client, &json!(id.to_string())).unwrap(),
            FieldValue::Uuid(id)
        );
        assert!(coerce(&client, &json!("not-a-uuid")).is_err());
        assert_eq!(coerce(&client, &Value::Null).unwrap(), FieldValue::Null);
    }

    #[test]
    fn test_integer_rejects_fractions() {
        let count = col("reminder_count", ColumnType::Integer);
        assert_eq!(coerce(&count, &json!("3")).unwrap(), FieldValue::Integer(3));
        assert_eq!(coerce(&count, &json!(2.0)).unwrap(), FieldValue::Integer(2));
        assert!(coerce(&count, &json!(2.5)).is_err());
    }
}
