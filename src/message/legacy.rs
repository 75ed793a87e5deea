//! Compatibility decoding for pickled message bodies.
//!
//! Producers that still use the legacy serializer put pickle streams on the
//! queue. Pickle can instantiate arbitrary objects, so bodies are decoded
//! into plain values only: any stream that references a global (a class or
//! callable) is rejected instead of resolved.

use serde_json::{Map, Number, Value};
use serde_pickle::{DeOptions, HashableValue, Value as PickleValue};

use crate::error::DecodeError;

/// Decodes a pickled mapping, re-keying its top-level keys as text.
pub fn decode_mapping(raw: &[u8]) -> Result<Value, DecodeError> {
    let value = serde_pickle::value_from_slice(raw, DeOptions::new())?;
    let PickleValue::Dict(entries) = value else {
        return Err(DecodeError::NotAMapping);
    };

    let mut map = Map::new();
    for (key, value) in entries {
        map.insert(key_text(key), to_json(value));
    }
    Ok(Value::Object(map))
}

fn key_text(key: HashableValue) -> String {
    match key {
        HashableValue::String(s) => s,
        HashableValue::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
        other => display_key(to_json(other.into_value())),
    }
}

fn display_key(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn to_json(value: PickleValue) -> Value {
    match value {
        PickleValue::None => Value::Null,
        PickleValue::Bool(b) => Value::Bool(b),
        PickleValue::I64(n) => Value::Number(n.into()),
        PickleValue::Int(big) => {
            let text = big.to_string();
            match text.parse::<u64>() {
                Ok(n) => Value::Number(n.into()),
                Err(_) => Value::String(text),
            }
        }
        PickleValue::F64(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        PickleValue::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        PickleValue::String(s) => Value::String(s),
        PickleValue::List(items) | PickleValue::Tuple(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        PickleValue::Set(items) | PickleValue::FrozenSet(items) => Value::Array(
            items
                .into_iter()
                .map(|item| to_json(item.into_value()))
                .collect(),
        ),
        PickleValue::Dict(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key_text(key), to_json(value)))
                .collect(),
        ),
    }
}
