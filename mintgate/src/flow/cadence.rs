//! JSON-Cadence values.
//!
//! The Access API wraps every value as `{"type": .., "value": ..}`. Decoding
//! strips that envelope and yields plain JSON: composites become objects
//! keyed by field name, dictionaries become objects keyed by the stringified
//! key, integers that fit 64 bits become numbers and everything wider stays
//! a string.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::error::FlowError;

const ADDRESS_BYTES: usize = 8;

const INTEGER_TYPES: &[&str] = &[
    "Int", "Int8", "Int16", "Int32", "Int64", "Int128", "Int256", "UInt", "UInt8", "UInt16",
    "UInt32", "UInt64", "UInt128", "UInt256", "Word8", "Word16", "Word32", "Word64", "Word128",
    "Word256",
];

const COMPOSITE_TYPES: &[&str] = &["Struct", "Resource", "Event", "Contract", "Enum"];

/// Decodes a base64 JSON-Cadence payload, as found in script results and
/// event payloads.
pub fn decode_base64(payload: &str) -> Result<Value, FlowError> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| FlowError::Decode(format!("payload is not base64: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| FlowError::Decode(format!("payload is not json: {e}")))?;
    decode(&value)
}

pub fn decode(value: &Value) -> Result<Value, FlowError> {
    let obj = value
        .as_object()
        .ok_or_else(|| FlowError::Decode(format!("expected a cadence value, got {value}")))?;
    let ty = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| FlowError::Decode("cadence value without type".to_string()))?;
    let inner = obj.get("value").unwrap_or(&Value::Null);

    match ty {
        "Void" => Ok(Value::Null),
        "Optional" => match inner {
            Value::Null => Ok(Value::Null),
            nested => decode(nested),
        },
        "Bool" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| mismatch(ty, inner)),
        "String" | "Character" | "Address" | "Fix64" | "UFix64" => inner
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| mismatch(ty, inner)),
        t if INTEGER_TYPES.contains(&t) => decode_integer(ty, inner),
        "Array" => inner
            .as_array()
            .ok_or_else(|| mismatch(ty, inner))?
            .iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        "Dictionary" => {
            let mut out = Map::new();
            for entry in inner.as_array().ok_or_else(|| mismatch(ty, inner))? {
                let key = decode(entry.get("key").unwrap_or(&Value::Null))?;
                let val = decode(entry.get("value").unwrap_or(&Value::Null))?;
                out.insert(key_string(key), val);
            }
            Ok(Value::Object(out))
        }
        t if COMPOSITE_TYPES.contains(&t) => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_array)
                .ok_or_else(|| mismatch(ty, inner))?;
            let mut out = Map::new();
            for field in fields {
                let name = field
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| FlowError::Decode("composite field without name".into()))?;
                out.insert(
                    name.to_string(),
                    decode(field.get("value").unwrap_or(&Value::Null))?,
                );
            }
            Ok(Value::Object(out))
        }
        "Path" => {
            let domain = inner.get("domain").and_then(Value::as_str);
            let identifier = inner.get("identifier").and_then(Value::as_str);
            match (domain, identifier) {
                (Some(d), Some(i)) => Ok(Value::String(format!("/{d}/{i}"))),
                _ => Err(mismatch(ty, inner)),
            }
        }
        "Type" => Ok(inner.get("staticType").cloned().unwrap_or(Value::Null)),
        "Capability" => Ok(inner.clone()),
        other => Err(FlowError::Decode(format!("unsupported cadence type {other}"))),
    }
}

/// Base64 JSON-Cadence encoding of an `Address` script argument.
pub fn address_argument(address: &str) -> Result<String, FlowError> {
    let address = normalize_address(address)?;
    let arg = json!({"type": "Address", "value": address});
    Ok(STANDARD.encode(arg.to_string()))
}

/// Validates a Flow address and renders it as `0x` + 16 lowercase hex digits.
pub fn normalize_address(address: &str) -> Result<String, FlowError> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > ADDRESS_BYTES * 2 {
        return Err(FlowError::InvalidAddress(address.to_string()));
    }
    let padded = format!("{digits:0>width$}", width = ADDRESS_BYTES * 2);
    let bytes = hex::decode(&padded).map_err(|_| FlowError::InvalidAddress(address.to_string()))?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// Address without its `0x` prefix, as used inside event type identifiers.
pub fn bare_address(address: &str) -> &str {
    let trimmed = address.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
}

fn decode_integer(ty: &str, inner: &Value) -> Result<Value, FlowError> {
    let raw = inner.as_str().ok_or_else(|| mismatch(ty, inner))?;
    if let Ok(n) = raw.parse::<u64>() {
        return Ok(Value::from(n));
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::from(n));
    }
    Ok(Value::String(raw.to_string()))
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn mismatch(ty: &str, inner: &Value) -> FlowError {
    FlowError::Decode(format!("malformed {ty} value: {inner}"))
}
