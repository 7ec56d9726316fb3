//! Tagged JSON wire encoding.
//!
//! [`encode`] turns application values into the JSON shapes the command API
//! accepts, and [`decode`] turns a parsed response back into [`Value`]s.
//!
//! # Wire Format
//!
//! | Kind | Wire shape |
//! |------|------------|
//! | object id | `{"$objectId": "65f1a2b3c4d5e6f708192a3b"}` |
//! | decimal | `{"$numberDecimal": "12.50"}` |
//! | UUID | `"6f9619ff-8b86-d011-b42d-00cf4fc964ff"` |
//! | date | `{"$date": 1700000000000}` (epoch milliseconds) |
//! | binary | `{"$binary": {"base64": "AQID", "subType": "00"}}` |
//! | big integer | JSON number (lossy beyond ±2^53) |
//!
//! On the way back, the generic extended-JSON tags (`$oid`, `$date`,
//! `$numberLong`, `$numberInt`, `$numberDouble`, `$numberDecimal`,
//! `$binary`, `$uuid`) are recognised along with the `$objectId` tag, at any
//! depth and inside arrays.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Number, Value as JsonValue, json};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::object_id::ObjectId;
use crate::value::{Binary, Document, Value};

/// Largest integer a 64-bit float represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

const OBJECT_ID_TAG: &str = "$objectId";
const OID_TAG: &str = "$oid";
const DATE_TAG: &str = "$date";
const DECIMAL_TAG: &str = "$numberDecimal";
const LONG_TAG: &str = "$numberLong";
const INT_TAG: &str = "$numberInt";
const DOUBLE_TAG: &str = "$numberDouble";
const BINARY_TAG: &str = "$binary";
const UUID_TAG: &str = "$uuid";

/// Encode a value into its wire representation.
pub fn encode(value: &Value) -> JsonValue {
    match value {
        Value::Custom(hook) => encode(&hook.to_wire_value()),
        Value::BigInt(i) => encode_big_int(*i),
        Value::ObjectId(id) => json!({ OBJECT_ID_TAG: id.to_hex() }),
        Value::Decimal(d) => json!({ DECIMAL_TAG: d.to_string() }),
        Value::Uuid(uuid) => JsonValue::String(uuid.to_string()),
        Value::Binary(binary) => match binary.as_uuid() {
            Some(uuid) => JsonValue::String(uuid.to_string()),
            None => json!({
                BINARY_TAG: {
                    "base64": STANDARD.encode(&binary.bytes),
                    "subType": format!("{:02x}", binary.subtype),
                }
            }),
        },
        Value::DateTime(dt) => json!({ DATE_TAG: dt.timestamp_millis() }),
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Double(d) => float_number(*d),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Array(items) => JsonValue::Array(items.iter().map(encode).collect()),
        Value::Document(document) => encode_document(document),
    }
}

/// Encode a document into a JSON object.
pub fn encode_document(document: &Document) -> JsonValue {
    JsonValue::Object(
        document
            .iter()
            .map(|(k, v)| (k.clone(), encode(v)))
            .collect(),
    )
}

/// Big integers are carried as floats. Inside the safe range the float is
/// integral and is written without a fraction; beyond it precision is lost.
fn encode_big_int(i: i128) -> JsonValue {
    let f = i as f64;
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 {
        JsonValue::from(f as i64)
    } else {
        float_number(f)
    }
}

/// Non-finite floats have no JSON form and are sent as `null`.
fn float_number(f: f64) -> JsonValue {
    Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

/// Decode a parsed wire value.
///
/// This consumes its input: strings, arrays and maps are moved into the
/// result rather than copied, so the parsed structure cannot be reused.
///
/// UUIDs (`Value::Uuid` and UUID-subtype [`Binary`](crate::Binary)) go out as
/// untagged strings, so they decode back as [`Value::String`]. Only a
/// `$uuid` tag yields [`Value::Uuid`].
///
/// # Errors
///
/// - [`ValidationError::InvalidReference`] when an `$objectId` or `$oid` tag
///   does not hold a valid 24-character hex string
/// - [`ValidationError::InvalidValue`] when another tag is malformed
pub fn decode(wire: JsonValue) -> Result<Value, ValidationError> {
    match wire {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Bool(b)),
        JsonValue::Number(n) => Ok(decode_number(&n)),
        JsonValue::String(s) => Ok(Value::String(s)),
        JsonValue::Array(items) => items
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        JsonValue::Object(map) => decode_object(map),
    }
}

/// Decode a wire value that must be a JSON object.
pub fn decode_document(wire: JsonValue) -> Result<Document, ValidationError> {
    match decode(wire)? {
        Value::Document(document) => Ok(document),
        other => Err(ValidationError::InvalidValue(format!(
            "expected a document, got {other:?}"
        ))),
    }
}

fn decode_number(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else if let Some(u) = n.as_u64() {
        Value::BigInt(i128::from(u))
    } else {
        Value::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn decode_object(mut map: Map<String, JsonValue>) -> Result<Value, ValidationError> {
    // Single-key maps may be tags. Anything unrecognised is a document.
    let single = match map.len() {
        1 => map.iter_mut().next().map(|(k, v)| (k.clone(), v.take())),
        _ => None,
    };
    if let Some((key, inner)) = single {
        return match key.as_str() {
            OBJECT_ID_TAG | OID_TAG => decode_object_id(inner),
            DATE_TAG => decode_date(inner),
            DECIMAL_TAG => decode_decimal(inner),
            LONG_TAG | INT_TAG => decode_tagged_int(&key, inner),
            DOUBLE_TAG => decode_tagged_double(inner),
            BINARY_TAG => decode_binary(inner, None),
            UUID_TAG => decode_uuid(inner),
            _ => {
                let mut document = Document::with_capacity(1);
                document.insert(key, decode(inner)?);
                Ok(Value::Document(document))
            }
        };
    }

    // Legacy binary: {"$binary": "<base64>", "$type": "<hex>"}
    if map.len() == 2 && map.contains_key(BINARY_TAG) && map.contains_key("$type") {
        let subtype = map.remove("$type");
        let payload = map.remove(BINARY_TAG).unwrap_or(JsonValue::Null);
        return decode_binary(payload, subtype);
    }

    let mut document = Document::with_capacity(map.len());
    for (key, value) in map {
        document.insert(key, decode(value)?);
    }
    Ok(Value::Document(document))
}

fn decode_object_id(inner: JsonValue) -> Result<Value, ValidationError> {
    match inner {
        JsonValue::String(hex) => ObjectId::parse_str(&hex).map(Value::ObjectId),
        other => Err(ValidationError::invalid_reference(
            other.to_string(),
            "identifier must be a string",
        )),
    }
}

fn decode_date(inner: JsonValue) -> Result<Value, ValidationError> {
    let millis = match inner {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| ValidationError::InvalidValue(format!("invalid $date: {n}")))?,
        JsonValue::String(s) => {
            return DateTime::parse_from_rfc3339(&s)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|e| ValidationError::InvalidValue(format!("invalid $date {s:?}: {e}")));
        }
        JsonValue::Object(mut map) => match map.remove(LONG_TAG) {
            Some(JsonValue::String(s)) => s
                .parse::<i64>()
                .map_err(|e| ValidationError::InvalidValue(format!("invalid $date {s:?}: {e}")))?,
            _ => {
                return Err(ValidationError::InvalidValue(
                    "$date object must hold $numberLong".to_string(),
                ));
            }
        },
        other => {
            return Err(ValidationError::InvalidValue(format!("invalid $date: {other}")));
        }
    };

    Utc.timestamp_millis_opt(millis)
        .single()
        .map(Value::DateTime)
        .ok_or_else(|| ValidationError::InvalidValue(format!("$date out of range: {millis}")))
}

fn decode_decimal(inner: JsonValue) -> Result<Value, ValidationError> {
    let digits = match inner {
        JsonValue::String(s) => s,
        JsonValue::Number(n) => n.to_string(),
        other => {
            return Err(ValidationError::InvalidValue(format!(
                "invalid $numberDecimal: {other}"
            )));
        }
    };
    BigDecimal::from_str(&digits)
        .map(Value::Decimal)
        .map_err(|e| ValidationError::InvalidValue(format!("invalid $numberDecimal {digits:?}: {e}")))
}

fn decode_tagged_int(tag: &str, inner: JsonValue) -> Result<Value, ValidationError> {
    match inner {
        JsonValue::String(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| ValidationError::InvalidValue(format!("invalid {tag} {s:?}: {e}"))),
        other => Err(ValidationError::InvalidValue(format!("invalid {tag}: {other}"))),
    }
}

fn decode_tagged_double(inner: JsonValue) -> Result<Value, ValidationError> {
    match inner {
        JsonValue::String(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|e| ValidationError::InvalidValue(format!("invalid $numberDouble {s:?}: {e}"))),
        other => Err(ValidationError::InvalidValue(format!(
            "invalid $numberDouble: {other}"
        ))),
    }
}

fn decode_binary(inner: JsonValue, legacy_subtype: Option<JsonValue>) -> Result<Value, ValidationError> {
    let (payload, subtype) = match (inner, legacy_subtype) {
        (JsonValue::Object(mut map), None) => (map.remove("base64"), map.remove("subType")),
        (payload @ JsonValue::String(_), subtype) => (Some(payload), subtype),
        (other, _) => {
            return Err(ValidationError::InvalidValue(format!("invalid $binary: {other}")));
        }
    };

    let Some(JsonValue::String(encoded)) = payload else {
        return Err(ValidationError::InvalidValue(
            "$binary requires a base64 string".to_string(),
        ));
    };
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| ValidationError::InvalidValue(format!("invalid $binary base64: {e}")))?;

    let subtype = match subtype {
        Some(JsonValue::String(hex)) => u8::from_str_radix(&hex, 16)
            .map_err(|e| ValidationError::InvalidValue(format!("invalid $binary subType {hex:?}: {e}")))?,
        None => 0,
        Some(other) => {
            return Err(ValidationError::InvalidValue(format!(
                "invalid $binary subType: {other}"
            )));
        }
    };

    Ok(Value::Binary(Binary::new(subtype, bytes)))
}

fn decode_uuid(inner: JsonValue) -> Result<Value, ValidationError> {
    match inner {
        JsonValue::String(s) => Uuid::parse_str(&s)
            .map(Value::Uuid)
            .map_err(|e| ValidationError::InvalidValue(format!("invalid $uuid {s:?}: {e}"))),
        other => Err(ValidationError::InvalidValue(format!("invalid $uuid: {other}"))),
    }
}
