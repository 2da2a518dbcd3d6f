// src/util/merge.rs

//! Deep merge for configuration mappings.

use serde_json::Value;

/// Returns true if `value` is a mapping with at least one `by-*` key, i.e. a
/// keyed-by conditional that must be treated as an opaque leaf.
pub fn is_keyed_by(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.keys().any(|k| k.starts_with("by-")),
        _ => false,
    }
}

/// Merge `override_` over `base`.
///
/// - two mappings merge key by key, recursively;
/// - a `by-*` conditional on either side is never merged: the override wins
///   whole;
/// - for every other combination the override wins.
pub fn deep_merge(base: &Value, override_: &Value) -> Value {
    match (base, override_) {
        (Value::Object(b), Value::Object(o)) => {
            if is_keyed_by(base) || is_keyed_by(override_) {
                return override_.clone();
            }
            let mut merged = b.clone();
            for (key, o_val) in o {
                let new_val = match b.get(key) {
                    Some(b_val) => deep_merge(b_val, o_val),
                    None => o_val.clone(),
                };
                merged.insert(key.clone(), new_val);
            }
            Value::Object(merged)
        }
        _ => override_.clone(),
    }
}
