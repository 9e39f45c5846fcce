//! Coercing a loosely-typed TOML fragment into a concrete options type.
//!
//! The prototype value is serialized to a table and used both as the schema
//! (its value kinds decide how each fragment entry is converted) and as the
//! defaults (keys the fragment does not mention keep the prototype value).
//!
//! | target   | accepted fragment values                                  |
//! |----------|-----------------------------------------------------------|
//! | integer  | integer, float without fraction, numeric string           |
//! | float    | float, integer, numeric string                            |
//! | bool     | bool, 0/1, `true/false/yes/no/on/off/1/0` strings         |
//! | string   | string, integer, float, bool (rendered as text)           |
//! | datetime | datetime, RFC 3339 string                                 |
//! | table    | table (merged recursively)                                |
//! | array    | array (taken as written)                                  |
//!
//! Keys the prototype does not serialize (unknown keys, `None` options) are
//! copied through unchanged and left to the typed decode.

use {
    serde::{Serialize, de::DeserializeOwned},
    toml::{Table, Value},
};

use crate::error::{Context, Error, Messages, Result};

/// Serialize `value` and require a table, the only shape options can take.
pub fn to_table<S: Serialize + ?Sized>(value: &S) -> Result<Table> {
    let value = Value::try_from(value)
        .map_err(|e| Error::Registry(format!("options are not a structured value: {e}")))?;
    match value {
        Value::Table(table) => Ok(table),
        other => Err(Error::Registry(format!(
            "options are not a structured value, got {}",
            other.type_str()
        ))),
    }
}

/// Merge `fragment` over `prototype` and decode the result as `S`.
pub fn coerce_into<S>(prototype: &S, fragment: &Table) -> Result<S>
where
    S: Serialize + DeserializeOwned,
{
    let schema = to_table(prototype)?;
    let mut errors = Messages::new();
    let merged = merge_table(&schema, fragment, "", &mut errors);
    errors.into_result(Error::Validation)?;

    Value::Table(merged).try_into::<S>().context("decode error")
}

fn merge_table(schema: &Table, fragment: &Table, prefix: &str, errors: &mut Messages) -> Table {
    let mut merged = schema.clone();
    for (key, value) in fragment {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match coerce_value(schema.get(key), value, &path, errors) {
            Some(v) => {
                merged.insert(key.clone(), v);
            },
            None => continue,
        }
    }
    merged
}

fn coerce_value(
    schema: Option<&Value>,
    value: &Value,
    path: &str,
    errors: &mut Messages,
) -> Option<Value> {
    let Some(schema) = schema else {
        return Some(value.clone());
    };

    let coerced = match (schema, value) {
        (Value::Table(s), Value::Table(v)) => {
            return Some(Value::Table(merge_table(s, v, path, errors)));
        },
        (Value::Integer(_), Value::Integer(i)) => Some(Value::Integer(*i)),
        (Value::Integer(_), Value::Float(f)) => float_to_int(*f).map(Value::Integer),
        (Value::Integer(_), Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::Integer),
        (Value::Float(_), Value::Float(f)) => Some(Value::Float(*f)),
        (Value::Float(_), Value::Integer(i)) => Some(Value::Float(*i as f64)),
        (Value::Float(_), Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::Float),
        (Value::Boolean(_), Value::Boolean(b)) => Some(Value::Boolean(*b)),
        (Value::Boolean(_), Value::Integer(0)) => Some(Value::Boolean(false)),
        (Value::Boolean(_), Value::Integer(1)) => Some(Value::Boolean(true)),
        (Value::Boolean(_), Value::String(s)) => parse_bool(s).map(Value::Boolean),
        (Value::String(_), Value::String(s)) => Some(Value::String(s.clone())),
        (Value::String(_), Value::Integer(i)) => Some(Value::String(i.to_string())),
        (Value::String(_), Value::Float(f)) => Some(Value::String(f.to_string())),
        (Value::String(_), Value::Boolean(b)) => Some(Value::String(b.to_string())),
        (Value::Datetime(_), Value::Datetime(d)) => Some(Value::Datetime(*d)),
        (Value::Datetime(_), Value::String(s)) => s.trim().parse().ok().map(Value::Datetime),
        (Value::Array(_), Value::Array(a)) => Some(Value::Array(a.clone())),
        _ => None,
    };

    if coerced.is_none() {
        errors.push(format!(
            "{path}: cannot use {} {value} as {}",
            value.type_str(),
            schema.type_str()
        ));
    }
    coerced
}

fn float_to_int(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
