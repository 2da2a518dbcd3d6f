// src/util/task_references.rs

//! Resolution of `{"task-reference": …}` wrappers in wire-format
//! definitions.
//!
//! While the graph is being generated, tasks can only refer to each other
//! by label; real task ids exist once the optimizer lays out the final
//! graph. A wire-format string wrapped in `task-reference` may embed
//! `<edge-name>` markers that are rewritten to the id of the dependency
//! behind that edge, plus the special markers `<self>` and `<decision>`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::{Result, TaskdagError};

pub fn resolve_task_references(
    label: &str,
    task_def: &Value,
    task_id: &str,
    decision_task_id: &str,
    dependencies: &BTreeMap<String, String>,
) -> Result<Value> {
    match task_def {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(template)) = map.get("task-reference") {
                    return Ok(Value::String(resolve_str(
                        label,
                        template,
                        task_id,
                        decision_task_id,
                        dependencies,
                    )?));
                }
            }
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                out.insert(
                    key.clone(),
                    resolve_task_references(label, value, task_id, decision_task_id, dependencies)?,
                );
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| {
                    resolve_task_references(label, v, task_id, decision_task_id, dependencies)
                })
                .collect::<Result<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn resolve_str(
    label: &str,
    template: &str,
    task_id: &str,
    decision_task_id: &str,
    dependencies: &BTreeMap<String, String>,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let edge = &after[..end];
        let resolved = match edge {
            "self" => task_id,
            "decision" => decision_task_id,
            edge => dependencies.get(edge).map(String::as_str).ok_or_else(|| {
                TaskdagError::Dependency(format!(
                    "task '{label}' has no dependency named '{edge}' for task-reference"
                ))
            })?,
        };
        out.push_str(resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
