//! Built-in envelope encoders/decoders for the value types the data model
//! calls out by name: UUID, date/time/datetime, decimal, enum, ordered
//! sequences, sets and tuples.
//!
//! Each pair mirrors one row of the payload-format table in the design
//! notes: a single-keyed JSON object whose key is the discriminator
//! (`UUID`, `ISO8601_datetime`, `__decimal__`, ...). Encoding a value never
//! fails for these built-ins; decoding fails with [`super::CodecError`] if
//! the wrapped state doesn't parse back into the expected shape.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use chronicle_types::Topic;

use super::CodecError;

/// `{"UUID": <hex>}`
pub fn encode_uuid(value: Uuid) -> Value {
    json!({ "UUID": value.simple().to_string() })
}

/// Inverse of [`encode_uuid`].
pub fn decode_uuid(value: &Value) -> Result<Uuid, CodecError> {
    let hex = single_key_str(value, "UUID")?;
    Uuid::parse_str(hex).map_err(|e| CodecError::DecodeFailed(e.to_string()))
}

/// `{"ISO8601_datetime": <rfc3339-with-micros>}`
pub fn encode_datetime(value: DateTime<Utc>) -> Value {
    json!({ "ISO8601_datetime": value.format("%Y-%m-%dT%H:%M:%S%.6f%z").to_string() })
}

/// Inverse of [`encode_datetime`].
pub fn decode_datetime(value: &Value) -> Result<DateTime<Utc>, CodecError> {
    let raw = single_key_str(value, "ISO8601_datetime")?;
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CodecError::DecodeFailed(e.to_string()))
}

/// `{"ISO8601_date": <yyyy-mm-dd>}`
pub fn encode_date(value: NaiveDate) -> Value {
    json!({ "ISO8601_date": value.format("%Y-%m-%d").to_string() })
}

/// Inverse of [`encode_date`].
pub fn decode_date(value: &Value) -> Result<NaiveDate, CodecError> {
    let raw = single_key_str(value, "ISO8601_date")?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| CodecError::DecodeFailed(e.to_string()))
}

/// `{"ISO8601_time": <HH:MM:SS.ffffff>}`
pub fn encode_time(value: NaiveTime) -> Value {
    json!({ "ISO8601_time": value.format("%H:%M:%S%.6f").to_string() })
}

/// Inverse of [`encode_time`].
pub fn decode_time(value: &Value) -> Result<NaiveTime, CodecError> {
    let raw = single_key_str(value, "ISO8601_time")?;
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f").map_err(|e| CodecError::DecodeFailed(e.to_string()))
}

/// `{"__decimal__": <string>}`
pub fn encode_decimal(value: Decimal) -> Value {
    json!({ "__decimal__": value.to_string() })
}

/// Inverse of [`encode_decimal`].
pub fn decode_decimal(value: &Value) -> Result<Decimal, CodecError> {
    let raw = single_key_str(value, "__decimal__")?;
    raw.parse().map_err(|e: rust_decimal::Error| CodecError::DecodeFailed(e.to_string()))
}

/// `{"__enum__": {"topic": T, "name": variant}}`
pub fn encode_enum(topic: &Topic, variant_name: &str) -> Value {
    json!({ "__enum__": { "topic": topic.as_str(), "name": variant_name } })
}

/// Inverse of [`encode_enum`], returning `(topic, variant_name)`.
pub fn decode_enum(value: &Value) -> Result<(String, String), CodecError> {
    let inner = single_key_object(value, "__enum__")?;
    let topic = field_str(inner, "topic")?;
    let name = field_str(inner, "name")?;
    Ok((topic.to_string(), name.to_string()))
}

/// `{"__tuple__": {"topic": T, "state": [...]}}`
pub fn encode_tuple(topic: &Topic, state: Vec<Value>) -> Value {
    json!({ "__tuple__": { "topic": topic.as_str(), "state": state } })
}

/// Inverse of [`encode_tuple`], returning `(topic, state)`.
pub fn decode_tuple(value: &Value) -> Result<(String, Vec<Value>), CodecError> {
    let inner = single_key_object(value, "__tuple__")?;
    let topic = field_str(inner, "topic")?.to_string();
    let state = field_array(inner, "state")?;
    Ok((topic, state))
}

/// `{"__deque__": {"topic": T, "values": [...]}}`
pub fn encode_deque(topic: &Topic, values: Vec<Value>) -> Value {
    json!({ "__deque__": { "topic": topic.as_str(), "values": values } })
}

/// Inverse of [`encode_deque`], returning `(topic, values)`.
pub fn decode_deque(value: &Value) -> Result<(String, Vec<Value>), CodecError> {
    let inner = single_key_object(value, "__deque__")?;
    let topic = field_str(inner, "topic")?.to_string();
    let values = field_array(inner, "values")?;
    Ok((topic, values))
}

/// `{"__set__": [sorted values...]}`
///
/// Values are sorted by their canonical JSON text so the envelope is
/// deterministic regardless of the set's native iteration order.
pub fn encode_set(mut values: Vec<Value>) -> Value {
    values.sort_by(|a, b| canonical(a).cmp(&canonical(b)));
    json!({ "__set__": values })
}

fn canonical(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Inverse of [`encode_set`].
pub fn decode_set(value: &Value) -> Result<Vec<Value>, CodecError> {
    let Value::Object(map) = value else {
        return Err(CodecError::DecodeFailed("expected a `__set__` envelope object".into()));
    };
    if map.len() != 1 {
        return Err(CodecError::DecodeFailed("`__set__` envelope must have exactly one key".into()));
    }
    field_array(map, "__set__")
}

/// `{"__type__": T}` – a reference to a registered type, by topic.
pub fn encode_type_ref(topic: &Topic) -> Value {
    json!({ "__type__": topic.as_str() })
}

/// Inverse of [`encode_type_ref`].
pub fn decode_type_ref(value: &Value) -> Result<String, CodecError> {
    single_key_str(value, "__type__").map(str::to_string)
}

//─────────────────────────────
//  Shared envelope helpers
//─────────────────────────────

fn single_key_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, CodecError> {
    let Value::Object(map) = value else {
        return Err(CodecError::DecodeFailed(format!("expected a `{key}` envelope object")));
    };
    if map.len() != 1 {
        return Err(CodecError::DecodeFailed(format!("`{key}` envelope must have exactly one key")));
    }
    field_str(map, key)
}

fn single_key_object<'a>(value: &'a Value, key: &str) -> Result<&'a Map<String, Value>, CodecError> {
    let Value::Object(map) = value else {
        return Err(CodecError::DecodeFailed(format!("expected a `{key}` envelope object")));
    };
    if map.len() != 1 {
        return Err(CodecError::DecodeFailed(format!("`{key}` envelope must have exactly one key")));
    }
    match map.get(key) {
        Some(Value::Object(inner)) => Ok(inner),
        _ => Err(CodecError::DecodeFailed(format!("`{key}` envelope state must be an object"))),
    }
}

fn field_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, CodecError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::DecodeFailed(format!("missing string field `{key}`")))
}

fn field_array(map: &Map<String, Value>, key: &str) -> Result<Vec<Value>, CodecError> {
    map.get(key)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| CodecError::DecodeFailed(format!("missing array field `{key}`")))
}

/// The discriminator keys this module knows how to normalize during a
/// recursive decode pass (see [`super::Transcoder::decode_tree`]).
pub const SCALAR_DISCRIMINATORS: &[&str] = &[
    "UUID",
    "ISO8601_datetime",
    "ISO8601_date",
    "ISO8601_time",
    "__decimal__",
    "__type__",
];
