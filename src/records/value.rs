//! Typed column values and serialized records

use crate::registry::{ColumnType, TableKey};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Uuid(Uuid),
    Text(String),
    Integer(i64),
    Numeric(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    TextArray(Vec<String>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Null or an empty string; both count as absent for required checks.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Numeric(d) => Some(*d),
            FieldValue::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            FieldValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        Some(match self {
            FieldValue::Null => return None,
            FieldValue::Uuid(_) => ColumnType::Uuid,
            FieldValue::Text(_) => ColumnType::Text,
            FieldValue::Integer(_) => ColumnType::Integer,
            FieldValue::Numeric(_) => ColumnType::Numeric,
            FieldValue::Boolean(_) => ColumnType::Boolean,
            FieldValue::Date(_) => ColumnType::Date,
            FieldValue::Timestamp(_) => ColumnType::Timestamp,
            FieldValue::TextArray(_) => ColumnType::TextArray,
        })
    }

    /// JSON form sent to the model: decimals as floats, dates as ISO strings.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Uuid(u) => json!(u.to_string()),
            FieldValue::Text(s) => json!(s),
            FieldValue::Integer(i) => json!(i),
            FieldValue::Numeric(d) => d.to_f64().map(|f| json!(f)).unwrap_or(Value::Null),
            FieldValue::Boolean(b) => json!(b),
            FieldValue::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
            FieldValue::Timestamp(t) => json!(t.to_rfc3339()),
            FieldValue::TextArray(items) => json!(items),
        }
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// One stored row of a registered table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub table: TableKey,
    pub fields: Fields,
}

impl Record {
    pub fn new(table: TableKey, fields: Fields) -> Self {
        Self { table, fields }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(FieldValue::as_text)
    }

    pub fn uuid(&self, column: &str) -> Option<Uuid> {
        self.get(column).and_then(FieldValue::as_uuid)
    }

    pub fn id(&self) -> Option<Uuid> {
        self.uuid("id")
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Subset of columns in the given order; absent columns serialize as null.
    pub fn project(&self, columns: &[(&str, &str)]) -> Value {
        let map: Map<String, Value> = columns
            .iter()
            .map(|(out, col)| {
                (
                    out.to_string(),
                    self.get(col).map(FieldValue::to_json).unwrap_or(Value::Null),
                )
            })
            .collect();
        Value::Object(map)
    }
}
