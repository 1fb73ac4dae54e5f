//! Conversions between `Value` and `serde_json::Value`.
//!
//! - **Strict** (`value_to_json`): fails on values JSON cannot hold.
//! - **Lossy** (`value_to_json_lossy`): such values become their debug text.

use std::collections::BTreeMap;

use varia_core::{Decimal, Value, VariantError};

/// Convert to JSON, failing on objects, functions and non-string map keys.
pub fn value_to_json(val: &Value) -> Result<serde_json::Value, VariantError> {
    match val.resolved() {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(n) => Ok(serde_json::Value::Number((*n).into())),
        Value::Decimal(d) => decimal_number(*d),
        Value::String(s) => Ok(serde_json::Value::String(s.as_str().to_string())),
        Value::Enum(_) => Ok(serde_json::Value::String(val.as_enum()?)),
        Value::List(items) => {
            let arr: Result<Vec<_>, _> = items.iter().map(value_to_json).collect();
            Ok(serde_json::Value::Array(arr?))
        }
        Value::Map(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map.entries().iter() {
                let key = k.as_str().map_err(|_| {
                    VariantError::Serialization(format!(
                        "cannot encode {} map key as JSON",
                        k.type_name()
                    ))
                })?;
                obj.insert(key.to_string(), value_to_json(v)?);
            }
            Ok(serde_json::Value::Object(obj))
        }
        Value::Weak(_) => value_to_json(&val.strengthen()),
        other => Err(VariantError::Serialization(format!(
            "cannot encode {} as JSON",
            other.type_name()
        ))),
    }
}

/// Convert to JSON without failing. Non-string keys use their text and
/// unsupported values become their debug rendering.
pub fn value_to_json_lossy(val: &Value) -> serde_json::Value {
    match val.resolved() {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::Decimal(d) => decimal_number(*d).unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.as_str().to_string()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json_lossy).collect()),
        Value::Map(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map.entries().iter() {
                obj.insert(k.string_cast(), value_to_json_lossy(v));
            }
            serde_json::Value::Object(obj)
        }
        other => serde_json::Value::String(other.to_debug_string()),
    }
}

fn decimal_number(d: Decimal) -> Result<serde_json::Value, VariantError> {
    serde_json::Number::from_f64(d.to_f64())
        .map(serde_json::Value::Number)
        .ok_or_else(|| VariantError::Serialization(format!("cannot encode {d} as JSON")))
}

/// Convert from JSON. Integers in the 32-bit range become Int; every other
/// number becomes a Decimal.
pub fn json_to_value(json: &serde_json::Value) -> Result<Value, VariantError> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Value::Int(i)
            } else {
                n.as_f64()
                    .and_then(Decimal::from_f64)
                    .map(Value::Decimal)
                    .ok_or_else(|| {
                        VariantError::Deserialization(format!("number {n} is out of decimal range"))
                    })?
            }
        }
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(arr) => {
            let items: Result<Vec<_>, _> = arr.iter().map(json_to_value).collect();
            Value::list(items?)
        }
        serde_json::Value::Object(obj) => {
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                map.insert(Value::from(k.as_str()), json_to_value(v)?);
            }
            Value::map(map)
        }
    })
}
