//! Shared JSON parsing helpers used by all exchange modules.
//!
//! Exchanges encode numbers inconsistently: the same field may arrive as a
//! JSON string (`"30000.5"`) or a native number (`30000.5`) depending on the
//! endpoint. These helpers accept both.

use serde_json::Value;

/// Parse a JSON value (string or number) as `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
pub fn parse_str_u64(v: Option<&Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        v.as_u64()
    }
}

/// Parse a JSON value (string or number) as `i64`.
#[inline]
pub fn parse_str_i64(v: Option<&Value>) -> Option<i64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        v.as_i64()
    }
}

/// Parse a named field on a JSON object as `f64` (string or number).
#[inline]
pub fn parse_f64_field(v: &Value, key: &str) -> Option<f64> {
    parse_str_f64(v.get(key))
}

/// First of `keys` present on `v`, parsed as `f64`.
pub fn first_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| parse_f64_field(v, k))
}

/// A field rendered as a string, whether the venue sent a string or a number.
pub fn id_field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numbers_and_strings_parse_alike() {
        let v = json!({"a": "30000.5", "b": 30000.5, "c": "x", "id": 739113577038255616u64, "cid": "grid-1"});
        assert_eq!(parse_f64_field(&v, "a"), Some(30000.5));
        assert_eq!(parse_f64_field(&v, "b"), Some(30000.5));
        assert_eq!(parse_f64_field(&v, "c"), None);
        assert_eq!(first_f64(&v, &["missing", "b"]), Some(30000.5));
        assert_eq!(id_field(&v, "id").as_deref(), Some("739113577038255616"));
        assert_eq!(id_field(&v, "cid").as_deref(), Some("grid-1"));
        assert_eq!(parse_str_u64(Some(&json!("17"))), Some(17));
        assert_eq!(parse_str_i64(Some(&json!(-3))), Some(-3));
    }
}
