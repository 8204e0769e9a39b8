// JSON helpers shared by the stage mappings, the reconciler and the formatter.
//
// Upstream payloads are loosely shaped: the same field may arrive under one
// of several names, as a string where a list was expected, or as null. These
// helpers read through explicit synonym lists and coerce to one shape.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// First non-null value among `keys`, in order.
pub fn pick<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find(|v| !v.is_null())
}

/// `null`/missing → `[]`, string → `[string]`, array → itself minus nulls,
/// anything else → `[]`. Blank strings count as missing.
pub fn coerce_to_array(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![Value::String(s.clone())],
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).cloned().collect(),
        _ => Vec::new(),
    }
}

/// Non-blank text from a string, number or bool.
pub fn coerce_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Text of the first synonym that has any.
pub fn text_of(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| coerce_text(value.get(*k)))
}

/// Coerced list of non-blank strings. Object items contribute their `name`.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    coerce_to_array(value)
        .iter()
        .filter_map(|item| match item {
            Value::Object(_) => text_of(item, &["name", "title"]),
            other => coerce_text(Some(other)),
        })
        .collect()
}

pub fn number_of(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match value.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

pub fn timestamp_of(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|k| {
        let raw = value.get(*k)?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Stable hex digest of a JSON value, used in dedup keys.
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..12])
}
