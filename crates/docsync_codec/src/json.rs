//! Conversion between [`Value`] and `serde_json::Value`.

use serde_json::{Map, Number};

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Convert a value into its JSON representation.
///
/// # Errors
///
/// Byte strings have no JSON form and non-finite floats are rejected.
pub fn to_json(value: &Value) -> CodecResult<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => serde_json::Value::Number(Number::from(*n)),
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| CodecError::non_finite(*f))?,
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(_) => return Err(CodecError::unsupported_type("bytes in JSON")),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect::<CodecResult<_>>()?)
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), to_json(v)?);
            }
            serde_json::Value::Object(out)
        }
    })
}

/// Convert a JSON value into a [`Value`].
///
/// # Errors
///
/// Returns [`CodecError::IntegerOverflow`] for integers above `i64::MAX`.
pub fn from_json(json: &serde_json::Value) -> CodecResult<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if n.is_u64() {
                return Err(CodecError::IntegerOverflow);
            } else {
                let f = n
                    .as_f64()
                    .ok_or_else(|| CodecError::invalid_structure("unrepresentable number"))?;
                Value::Float(f)
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(from_json).collect::<CodecResult<_>>()?)
        }
        serde_json::Value::Object(map) => {
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), from_json(v)?);
            }
            Value::Object(out)
        }
    })
}

/// Parse JSON text into a [`Value`].
///
/// # Errors
///
/// Returns [`CodecError::InvalidStructure`] for malformed JSON.
pub fn parse_json(text: &str) -> CodecResult<Value> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| CodecError::invalid_structure(e.to_string()))?;
    from_json(&json)
}
