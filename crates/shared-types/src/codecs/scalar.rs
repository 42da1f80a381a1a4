//! Pass-through codecs for plain SQL column types.
//!
//! These only check the storage variant; they exist so every column of a
//! row goes through the same [`ColumnCodec`] seam.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::ColumnCodec;
use crate::column::ColumnValue;
use crate::errors::CodecError;

fn mismatch(codec: &'static str, expected: &'static str, found: &ColumnValue) -> CodecError {
    CodecError::Type {
        codec,
        expected,
        found: found.type_name(),
    }
}

/// `BOOLEAN` columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl ColumnCodec for BoolCodec {
    type Value = bool;

    fn encode(&self, value: &bool) -> Result<ColumnValue, CodecError> {
        Ok(ColumnValue::Bool(*value))
    }

    fn decode(&self, column: &ColumnValue) -> Result<bool, CodecError> {
        match column {
            ColumnValue::Bool(b) => Ok(*b),
            other => Err(mismatch("bool", "bool", other)),
        }
    }
}

/// Variable-length `BYTEA` columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl ColumnCodec for BytesCodec {
    type Value = Vec<u8>;

    fn encode(&self, value: &Vec<u8>) -> Result<ColumnValue, CodecError> {
        Ok(ColumnValue::Bytes(value.clone()))
    }

    fn decode(&self, column: &ColumnValue) -> Result<Vec<u8>, CodecError> {
        match column {
            ColumnValue::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(mismatch("bytes", "bytes", other)),
        }
    }
}

/// `JSON`/`JSONB` columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ColumnCodec for JsonCodec {
    type Value = Value;

    fn encode(&self, value: &Value) -> Result<ColumnValue, CodecError> {
        Ok(ColumnValue::Json(value.clone()))
    }

    fn decode(&self, column: &ColumnValue) -> Result<Value, CodecError> {
        match column {
            ColumnValue::Json(value) => Ok(value.clone()),
            // Text-typed JSON columns come back as strings.
            ColumnValue::Text(text) => serde_json::from_str(text).map_err(|e| CodecError::Format {
                codec: "json",
                reason: e.to_string(),
            }),
            other => Err(mismatch("json", "json document", other)),
        }
    }
}

/// `TIMESTAMPTZ` columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampCodec;

impl ColumnCodec for TimestampCodec {
    type Value = DateTime<Utc>;

    fn encode(&self, value: &DateTime<Utc>) -> Result<ColumnValue, CodecError> {
        Ok(ColumnValue::Timestamp(*value))
    }

    fn decode(&self, column: &ColumnValue) -> Result<DateTime<Utc>, CodecError> {
        match column {
            ColumnValue::Timestamp(ts) => Ok(*ts),
            other => Err(mismatch("timestamp", "timestamp", other)),
        }
    }
}
