//! Canonical serialization shared by block writers and verifiers
//!
//! Object keys are emitted in sorted order, floats with fixed precision,
//! and no insignificant whitespace. Any component that needs a block hash
//! must go through [`canonical_json`] so that writer and verifier agree.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Digits after the decimal point for non-integral numbers
pub const FLOAT_PRECISION: usize = 6;

/// Render a JSON value in canonical form
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                let _ = write!(out, "{}", i);
            } else if let Some(u) = n.as_u64() {
                let _ = write!(out, "{}", u);
            } else if let Some(f) = n.as_f64() {
                let _ = write!(out, "{:.*}", FLOAT_PRECISION, f);
            }
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json escaping of a bare string cannot fail
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}

/// Lowercase hex SHA-256 of the canonical form
pub fn canonical_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_recursively() {
        let value = json!({"b": 1, "a": {"z": true, "c": null}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":null,"z":true},"b":1}"#);
    }

    #[test]
    fn test_float_precision_fixed() {
        let value = json!({"ratio": 0.1, "years": 3.0, "count": 7});
        assert_eq!(
            canonical_json(&value),
            r#"{"count":7,"ratio":0.100000,"years":3.000000}"#
        );
    }

    #[test]
    fn test_strings_escaped() {
        let value = json!(["quote\"d", "line\nbreak"]);
        assert_eq!(canonical_json(&value), r#"["quote\"d","line\nbreak"]"#);
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let mut a = serde_json::Map::new();
        a.insert("x".into(), json!(1));
        a.insert("y".into(), json!(2));
        let mut b = serde_json::Map::new();
        b.insert("y".into(), json!(2));
        b.insert("x".into(), json!(1));
        assert_eq!(canonical_hash(&Value::Object(a)), canonical_hash(&Value::Object(b)));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = canonical_hash(&json!({}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
