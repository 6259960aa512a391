//! Lenient deserializers for chain JSON.
//!
//! gRPC-gateway encodes 64-bit integers as strings while smaller ones come as
//! numbers, and CometBFT emits `null` for empty lists.

use serde::{Deserialize, Deserializer, de::Error as _};
use serde_json::Value;

pub(super) fn string_or_null<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

pub(super) fn vec_or_null<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

fn value_to_u64<E: serde::de::Error>(value: &Value) -> Result<Option<u64>, E> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| E::custom(format!("expected unsigned integer, got {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| E::custom(format!("expected unsigned integer, got '{}'", s))),
        other => Err(E::custom(format!("expected unsigned integer, got {}", other))),
    }
}

pub(super) fn u64_lenient<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(d)?;
    Ok(value_to_u64::<D::Error>(&value)?.unwrap_or(0))
}

pub(super) fn opt_u32_lenient<'de, D>(d: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(d)?;
    value_to_u64::<D::Error>(&value)?
        .map(|v| u32::try_from(v).map_err(|_| D::Error::custom("value exceeds u32")))
        .transpose()
}
