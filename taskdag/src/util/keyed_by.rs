// src/util/keyed_by.rs

//! Resolution of `by-<attribute>` conditional values.
//!
//! A field that is "optionally keyed by" some attributes accepts either a
//! plain leaf value or a single-key mapping:
//!
//! ```yaml
//! chunks:
//!   by-platform:
//!     linux.*: 12
//!     macosx: 6
//!     default: 3
//! ```
//!
//! Matching tries the attribute value as an exact key first, then treats
//! each remaining key as an anchored regex, and finally falls back to
//! `default`. Conditionals nest; each resolution step may expose another
//! `by-*` mapping underneath, which is resolved in turn.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::errors::{Result, TaskdagError};

/// Resolve all `by-*` wrappers on `value`, returning the selected leaf.
///
/// `item_name` is only used in error messages. `attributes` supplies the
/// values that `by-<attr>` keys are matched against; a missing attribute
/// only matters when no `default` arm exists.
pub fn evaluate_keyed_by(
    value: &Value,
    item_name: &str,
    attributes: &BTreeMap<String, Value>,
) -> Result<Value> {
    let mut current = value.clone();

    loop {
        let Some((attr, alternatives)) = as_keyed_by(&current) else {
            return Ok(current);
        };

        let attr_value = attributes.get(&attr).map(value_as_match_string);

        let chosen = match &attr_value {
            Some(v) if alternatives.contains_key(v) => alternatives.get(v),
            Some(v) => {
                let mut matched: Option<(&String, &Value)> = None;
                for (key, alt) in alternatives.iter().filter(|(k, _)| k.as_str() != "default") {
                    let re = Regex::new(&format!("^(?:{key})$")).map_err(|e| keyed_by_error(
                        item_name,
                        &attr,
                        &format!("invalid alternative pattern {key:?}: {e}"),
                    ))?;
                    if re.is_match(v) {
                        if matched.is_some() {
                            return Err(keyed_by_error(
                                item_name,
                                &attr,
                                &format!("{v:?} matches more than one alternative"),
                            ));
                        }
                        matched = Some((key, alt));
                    }
                }
                matched.map(|(_, alt)| alt).or_else(|| alternatives.get("default"))
            }
            None => alternatives.get("default"),
        };

        match chosen {
            Some(next) => current = next.clone(),
            None => {
                return Err(keyed_by_error(
                    item_name,
                    &attr,
                    &format!(
                        "no alternative matches {} and no default is given",
                        attr_value
                            .map(|v| format!("{v:?}"))
                            .unwrap_or_else(|| format!("(attribute '{attr}' is unset)"))
                    ),
                ))
            }
        }
    }
}

/// Resolve a `by-*` conditional in place at `field` (dotted path, with `[]`
/// fanning out over list elements) inside `item`.
///
/// Values from `extra` take precedence over same-named fields of `item`
/// when matching. Fields that are absent, or that hold no conditional, are
/// left untouched.
pub fn resolve_keyed_by(
    item: &mut Value,
    field: &str,
    item_name: &str,
    extra: &BTreeMap<String, Value>,
) -> Result<()> {
    // The attribute context is the item's own top-level fields with `extra`
    // layered on top.
    let mut attributes: BTreeMap<String, Value> = match item {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => BTreeMap::new(),
    };
    attributes.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

    let descriptor = format!("`{field}` in `{item_name}`");
    for slot in iter_dot_path_mut(item, field) {
        *slot = evaluate_keyed_by(slot, &descriptor, &attributes)?;
    }
    Ok(())
}

/// If `value` is a single-key `by-<attr>` mapping, return the attribute name
/// and its alternatives.
fn as_keyed_by(value: &Value) -> Option<(String, BTreeMap<String, Value>)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    let attr = key.strip_prefix("by-")?;
    let alternatives = inner
        .as_object()?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Some((attr.to_string(), alternatives))
}

/// Mutable slots at `path` within `value`. A `[]` component fans out over
/// every element of a list, matching how kind configuration addresses
/// fields like `worker.artifacts[].name`.
fn iter_dot_path_mut<'a>(value: &'a mut Value, path: &str) -> Vec<&'a mut Value> {
    let mut slots: Vec<&'a mut Value> = vec![value];

    for part in path.split('.') {
        let (key, fan_out) = match part.strip_suffix("[]") {
            Some(key) => (key, true),
            None => (part, false),
        };

        let mut next: Vec<&'a mut Value> = Vec::new();
        for slot in slots {
            let Some(child) = slot.as_object_mut().and_then(|m| m.get_mut(key)) else {
                continue;
            };
            if fan_out {
                if let Value::Array(items) = child {
                    next.extend(items.iter_mut());
                }
            } else {
                next.push(child);
            }
        }
        slots = next;
    }

    slots
}

/// Attribute values are matched as strings; scalars stringify the obvious
/// way.
fn value_as_match_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn keyed_by_error(item_name: &str, attr: &str, message: &str) -> TaskdagError {
    TaskdagError::Schema {
        descriptor: item_name.to_string(),
        message: format!("while resolving `by-{attr}`: {message}"),
    }
}
