//! Bind value coercion.
//!
//! Callers bind dynamically typed [`serde_json::Value`]s. At bind time each value
//! is coerced exactly once into a [`WireValue`], the closed set of categories the
//! backends accept: string, integer, boolean and null. Anything else is rejected
//! with [`DbError::UnsupportedBindType`].

use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire category of a bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    Str,
    Int,
    Bool,
    Null,
}

/// A bound value after coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl WireValue {
    /// The wire category of this value.
    pub fn wire_type(&self) -> WireType {
        match self {
            WireValue::Str(_) => WireType::Str,
            WireValue::Int(_) => WireType::Int,
            WireValue::Bool(_) => WireType::Bool,
            WireValue::Null => WireType::Null,
        }
    }

    /// Render the value as a SQL literal for the emulated statement.
    ///
    /// Strings of `max_preserved` or more characters are cut to `max_preserved`
    /// characters followed by `...`. Booleans render as `0`/`1`.
    pub fn to_literal(&self, dialect: Dialect, max_preserved: Option<usize>) -> String {
        match self {
            WireValue::Str(s) => match max_preserved {
                Some(max) if max > 0 && s.chars().count() >= max => {
                    let mut cut: String = s.chars().take(max).collect();
                    cut.push_str("...");
                    dialect.quote_string(&cut)
                }
                _ => dialect.quote_string(s),
            },
            WireValue::Int(v) => v.to_string(),
            WireValue::Bool(b) => i32::from(*b).to_string(),
            WireValue::Null => "NULL".to_string(),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a dynamically typed value into its wire representation.
///
/// `parameter` names the bind parameter in the error.
pub fn coerce(parameter: &str, value: &Value) -> DbResult<WireValue> {
    match value {
        Value::String(s) => Ok(WireValue::Str(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(WireValue::Int)
            .ok_or_else(|| DbError::unsupported_bind_type(parameter, type_name(value))),
        Value::Bool(b) => Ok(WireValue::Bool(*b)),
        Value::Null => Ok(WireValue::Null),
        Value::Array(_) | Value::Object(_) => {
            Err(DbError::unsupported_bind_type(parameter, type_name(value)))
        }
    }
}

/// Coerce a value, honoring a declared wire type.
///
/// Conversions that would lose information (e.g. `"abc"` as an integer) are
/// rejected with [`DbError::UnsupportedBindType`].
pub fn coerce_as(parameter: &str, value: &Value, hint: WireType) -> DbResult<WireValue> {
    let natural = coerce(parameter, value)?;
    if natural.wire_type() == hint {
        return Ok(natural);
    }

    let mismatch = || {
        DbError::unsupported_bind_type(
            parameter,
            format!("{} declared as {hint:?}", type_name(value)),
        )
    };

    match (natural, hint) {
        (_, WireType::Null) => Ok(WireValue::Null),
        (WireValue::Null, _) => Ok(WireValue::Null),
        (WireValue::Int(v), WireType::Str) => Ok(WireValue::Str(v.to_string())),
        (WireValue::Bool(b), WireType::Str) => Ok(WireValue::Str(i32::from(b).to_string())),
        (WireValue::Bool(b), WireType::Int) => Ok(WireValue::Int(i64::from(b))),
        (WireValue::Str(s), WireType::Int) => {
            s.trim().parse::<i64>().map(WireValue::Int).map_err(|_| mismatch())
        }
        (WireValue::Int(v), WireType::Bool) => match v {
            0 => Ok(WireValue::Bool(false)),
            1 => Ok(WireValue::Bool(true)),
            _ => Err(mismatch()),
        },
        (WireValue::Str(s), WireType::Bool) => match s.as_str() {
            "0" | "false" => Ok(WireValue::Bool(false)),
            "1" | "true" => Ok(WireValue::Bool(true)),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}
