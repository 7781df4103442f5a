//! Response normalizer (spec.md §4.0, §9 "Casing drift").
//!
//! The server returns field names in either lower-case or PascalCase,
//! inconsistently across endpoints, and wraps collections in either
//! `results` or `Results`. Rather than scatter `?.x ?? ?.X` reads through
//! the domain API, every response passes through [`normalize_envelope`]
//! once at the HTTP boundary, after which the rest of the codebase only
//! ever sees snake_case keys.

use serde_json::{Map, Value};

/// Recursively rewrite every object key in `value` to snake_case.
pub fn normalize_envelope(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut normalized = Map::with_capacity(map.len());
            for (key, val) in map {
                normalized.insert(to_snake_case(&key), normalize_envelope(val));
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_envelope).collect()),
        other => other,
    }
}

/// Convert a PascalCase, camelCase, or already-snake_case key to snake_case.
fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower_or_digit = false;

    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_lower_or_digit = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}
