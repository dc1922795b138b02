//! Lenient field accessors for agent JSON.
//!
//! Agents of different versions encode the same field as a number, a numeric
//! string or a boolean. These helpers accept every shape seen in the wild and
//! return `None` for anything else.

use serde_json::Value;

/// A non-empty string, or a number rendered as text.
pub fn str_of(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// An integer from a number (fractions truncated) or a numeric string.
pub fn i64_of(obj: &Value, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// A boolean from `true`/`false`, `0`/`1` or their string forms.
pub fn bool_of(obj: &Value, key: &str) -> Option<bool> {
    match obj.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A sub-object that holds at least one key.
pub fn non_empty_object<'a>(obj: &'a Value, key: &str) -> Option<&'a Value> {
    obj.get(key)
        .filter(|v| v.as_object().is_some_and(|m| !m.is_empty()))
}
