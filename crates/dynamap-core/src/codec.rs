//! Conversion between native [`Value`]s and wire [`AttributeValue`]s.

use std::collections::HashMap;

use dynamap_model::{AttributeValue, Item};

use crate::error::{MapperError, MapperResult};
use crate::value::Value;

/// Convert a native value into its wire form.
///
/// # Errors
///
/// Returns [`MapperError::ValueCodec`] for non-finite floats, which the store
/// cannot represent.
pub fn serialize(value: &Value) -> MapperResult<AttributeValue> {
    Ok(match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Int(n) => AttributeValue::N(n.to_string()),
        Value::Float(x) => AttributeValue::N(number_text(*x)?),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Bytes(b) => AttributeValue::B(b.clone()),
        Value::List(items) => {
            AttributeValue::L(items.iter().map(serialize).collect::<MapperResult<_>>()?)
        }
        Value::Map(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), serialize(v)?)))
                .collect::<MapperResult<_>>()?,
        ),
        Value::StringSet(items) => AttributeValue::Ss(items.clone()),
        Value::NumberSet(items) => AttributeValue::Ns(
            items
                .iter()
                .map(|v| match v {
                    Value::Int(n) => Ok(n.to_string()),
                    Value::Float(x) => number_text(*x),
                    other => Err(MapperError::ValueCodec(format!(
                        "number set contains a non-numeric element: {other}"
                    ))),
                })
                .collect::<MapperResult<_>>()?,
        ),
        Value::BinarySet(items) => AttributeValue::Bs(items.clone()),
    })
}

/// Convert a wire value into its native form.
///
/// # Errors
///
/// Returns [`MapperError::ValueCodec`] when a number is not parseable.
pub fn deserialize(value: &AttributeValue) -> MapperResult<Value> {
    Ok(match value {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => parse_number(n)?,
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::B(b) => Value::Bytes(b.clone()),
        AttributeValue::L(items) => {
            Value::List(items.iter().map(deserialize).collect::<MapperResult<_>>()?)
        }
        AttributeValue::M(map) => Value::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), deserialize(v)?)))
                .collect::<MapperResult<_>>()?,
        ),
        AttributeValue::Ss(items) => Value::StringSet(items.clone()),
        AttributeValue::Ns(items) => Value::NumberSet(
            items
                .iter()
                .map(|n| parse_number(n))
                .collect::<MapperResult<_>>()?,
        ),
        AttributeValue::Bs(items) => Value::BinarySet(items.clone()),
    })
}

/// Serialize every entry of a native map into a wire item.
///
/// # Errors
///
/// Propagates the first [`serialize`] failure.
pub fn serialize_item<'a, I, K>(values: I) -> MapperResult<Item>
where
    I: IntoIterator<Item = (K, &'a Value)>,
    K: AsRef<str>,
{
    values
        .into_iter()
        .map(|(k, v)| Ok((k.as_ref().to_owned(), serialize(v)?)))
        .collect()
}

/// Deserialize every entry of a wire item.
///
/// # Errors
///
/// Propagates the first [`deserialize`] failure.
pub fn deserialize_item(item: &Item) -> MapperResult<HashMap<String, Value>> {
    item.iter()
        .map(|(k, v)| Ok((k.clone(), deserialize(v)?)))
        .collect()
}

fn number_text(x: f64) -> MapperResult<String> {
    if x.is_finite() {
        Ok(x.to_string())
    } else {
        Err(MapperError::ValueCodec(format!(
            "number {x} cannot be stored"
        )))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn parse_number(text: &str) -> MapperResult<Value> {
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    let x: f64 = trimmed
        .parse()
        .map_err(|_| MapperError::ValueCodec(format!("invalid number '{text}'")))?;
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        // Integral values such as "1.0" or "1e3" come back as integers.
        return Ok(Value::Int(x as i64));
    }
    Ok(Value::Float(x))
}
