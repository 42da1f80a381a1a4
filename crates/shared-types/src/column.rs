//! # Column Values
//!
//! Dynamically-typed values as they cross the storage boundary. Adapters
//! read database rows into `ColumnValue`s and the codecs turn them into
//! strict domain types (and back).

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// A single value read from or written to a storage column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// SQL `NULL`.
    Null,
    /// Boolean column.
    Bool(bool),
    /// Machine-width integer (`SMALLINT`, `INTEGER`, `BIGINT`).
    Integer(i64),
    /// Floating point number. Never produced by the codecs.
    Float(f64),
    /// Arbitrary precision decimal (`NUMERIC(p, s)`).
    Numeric(BigDecimal),
    /// Text column.
    Text(String),
    /// Binary column.
    Bytes(Vec<u8>),
    /// JSON document.
    Json(Value),
    /// Timezone-aware timestamp.
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    /// Short name of the variant, used in codec error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Bool(_) => "bool",
            ColumnValue::Integer(_) => "integer",
            ColumnValue::Float(_) => "float",
            ColumnValue::Numeric(_) => "numeric",
            ColumnValue::Text(_) => "text",
            ColumnValue::Bytes(_) => "bytes",
            ColumnValue::Json(_) => "json",
            ColumnValue::Timestamp(_) => "timestamp",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Map a wire JSON value onto a column value.
    ///
    /// Integers become `Integer` (or `Numeric` above `i64::MAX`), any other
    /// number becomes `Float` so integral codecs can reject it.
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ColumnValue::Null,
            Value::Bool(b) => ColumnValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ColumnValue::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    ColumnValue::Numeric(BigDecimal::from(u))
                } else {
                    ColumnValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => ColumnValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => ColumnValue::Json(value.clone()),
        }
    }
}

impl From<&[u8]> for ColumnValue {
    fn from(value: &[u8]) -> Self {
        ColumnValue::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for ColumnValue {
    fn from(value: Vec<u8>) -> Self {
        ColumnValue::Bytes(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Integer(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Bool(value)
    }
}

impl From<BigDecimal> for ColumnValue {
    fn from(value: BigDecimal) -> Self {
        ColumnValue::Numeric(value)
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(value: DateTime<Utc>) -> Self {
        ColumnValue::Timestamp(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ColumnValue::Null, Into::into)
    }
}
