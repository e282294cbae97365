//! Conversions between [`Value`] and `serde_json::Value`.
//!
//! Used by the command line tool to accept arguments and print results as
//! JSON. JSON has no binary, extension or non-string-key map types, so the
//! conversion to JSON is partial. It is also limited to [`MAX_DEPTH`] levels
//! of nesting, the same limit serde_json applies when parsing.

use serde_json::{Map, Number};
use thiserror::Error;

use super::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JsonError {
    #[error("{0} values have no JSON representation")]
    Unrepresentable(&'static str),
    #[error("non-finite float {0} has no JSON representation")]
    NonFinite(f64),
    #[error("map key {0} is not a string")]
    NonStringKey(String),
    #[error("value is nested more than {MAX_DEPTH} levels deep")]
    TooDeep,
}

/// Deepest container nesting converted to JSON.
pub const MAX_DEPTH: usize = 128;

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::from(u)
                } else {
                    Value::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (Value::Str(k), Value::from(v))).collect())
            }
        }
    }
}

impl TryFrom<&Value> for serde_json::Value {
    type Error = JsonError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        to_json(value, 0)
    }
}

fn to_json(value: &Value, depth: usize) -> Result<serde_json::Value, JsonError> {
    if matches!(value, Value::Array(_) | Value::Map(_)) && depth == MAX_DEPTH {
        return Err(JsonError::TooDeep);
    }
    let json = match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::F32(f) => float(f64::from(*f))?,
        Value::F64(f) => float(*f)?,
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| to_json(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let key = k.as_str().ok_or_else(|| JsonError::NonStringKey(k.to_string()))?;
                map.insert(key.to_string(), to_json(v, depth + 1)?);
            }
            serde_json::Value::Object(map)
        }
        Value::Bin(_) => return Err(JsonError::Unrepresentable("bin")),
        Value::Ext { .. } => return Err(JsonError::Unrepresentable("ext")),
    };
    Ok(json)
}

fn float(f: f64) -> Result<serde_json::Value, JsonError> {
    Number::from_f64(f)
        .map(serde_json::Value::Number)
        .ok_or(JsonError::NonFinite(f))
}
