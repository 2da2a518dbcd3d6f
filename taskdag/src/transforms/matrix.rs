// src/transforms/matrix.rs

//! Expand a task over the Cartesian product of named axes.
//!
//! ```yaml
//! test:
//!   matrix:
//!     os: [linux, mac, windows]
//!     exclude:
//!       - os: windows
//! ```
//!
//! Axes expand in the order the stanza declares them: the first axis
//! varies slowest. Each produced task records the chosen combination in
//! `attributes.matrix`, gets `<name>-<value>-<value>…` as its name (or the
//! interpolated `set-name` template), and has `{matrix[<axis>]}`
//! placeholders substituted into the designated fields (`name` and
//! `description` by default).

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::errors::Result;
use crate::registry::Registries;
use crate::util::schema::{map_of, open_map, optional, seq, Schema};
use crate::util::templates::substitute_task_fields;

use super::{transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.matrix:transforms";

const DEFAULT_FIELDS: &[&str] = &["name", "description"];

pub fn register(registries: &mut Registries) -> Result<()> {
    let mut transforms = TransformSequence::new();
    transforms.add_validate(matrix_schema());
    transforms.add(expand_matrix);
    registries.register_transforms(REFERENCE, transforms)
}

fn matrix_schema() -> Schema {
    open_map(vec![optional(
        "matrix",
        open_map(vec![
            optional("exclude", seq(map_of(Schema::Str))),
            optional("set-name", Schema::Str),
            optional("substitution-fields", seq(Schema::Str)),
        ]),
    )])
}

fn expand_matrix(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let mut out = Vec::new();

    for mut task in tasks {
        let Some(matrix) = task.remove("matrix") else {
            out.push(task);
            continue;
        };
        let Value::Object(matrix) = matrix else {
            return Err(transform_error(config, &task, "matrix must be a mapping".into()));
        };

        let exclude = matrix
            .get("exclude")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        let set_name = matrix.get("set-name").cloned();
        let fields: Vec<String> = match matrix.get("substitution-fields") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        };

        // Everything that isn't configuration is an axis, in declaration
        // order (mappings keep document order, and removal would disturb
        // it, so the reserved keys are filtered instead).
        let axes: Vec<(String, Vec<Value>)> = matrix
            .into_iter()
            .filter(|(key, _)| {
                !matches!(key.as_str(), "exclude" | "set-name" | "substitution-fields")
            })
            .map(|(axis, values)| match values {
                Value::Array(values) => Ok((axis, values)),
                other => Err(transform_error(
                    config,
                    &task,
                    format!("matrix axis '{axis}' must be a list, got {other}"),
                )),
            })
            .collect::<Result<_>>()?;

        if axes.is_empty() {
            return Err(transform_error(config, &task, "matrix defines no axes".into()));
        }

        for combination in cartesian(&axes) {
            if excluded(&combination, &exclude) {
                continue;
            }

            let mut subtask = task.clone();
            let chosen: Map<String, Value> = combination
                .iter()
                .map(|(axis, value)| (axis.clone(), value.clone()))
                .collect();

            let attributes = subtask
                .entry("attributes".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(attributes) = attributes.as_object_mut() {
                attributes.insert("matrix".to_string(), Value::Object(chosen.clone()));
            }

            let base_name = subtask
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let suffix: Vec<String> = combination
                .iter()
                .map(|(_, v)| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect();
            let new_name = match &set_name {
                Some(template) => template.as_str().unwrap_or_default().to_string(),
                None => format!("{base_name}-{}", suffix.join("-")),
            };
            subtask.insert("name".to_string(), Value::String(new_name));

            let context: BTreeMap<String, Value> =
                [("matrix".to_string(), Value::Object(chosen))].into();
            let mut as_value = Value::Object(subtask);
            substitute_task_fields(&mut as_value, &fields, &context)?;
            // `set-name` templates may reference the matrix too.
            if set_name.is_some() {
                substitute_task_fields(&mut as_value, &["name".to_string()], &context)?;
            }
            let Value::Object(subtask) = as_value else { unreachable!() };
            out.push(subtask);
        }
    }

    Ok(out)
}

fn cartesian(axes: &[(String, Vec<Value>)]) -> Vec<Vec<(String, Value)>> {
    let mut combinations: Vec<Vec<(String, Value)>> = vec![Vec::new()];
    for (axis, values) in axes {
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for combination in &combinations {
            for value in values {
                let mut extended = combination.clone();
                extended.push((axis.clone(), value.clone()));
                next.push(extended);
            }
        }
        combinations = next;
    }
    combinations
}

/// An exclude entry eliminates a combination when every axis it names
/// matches the chosen value.
fn excluded(combination: &[(String, Value)], exclude: &Value) -> bool {
    let Some(entries) = exclude.as_array() else {
        return false;
    };
    entries.iter().any(|entry| {
        entry.as_object().is_some_and(|entry| {
            !entry.is_empty()
                && entry.iter().all(|(axis, value)| {
                    combination
                        .iter()
                        .any(|(a, v)| a == axis && v == value)
                })
        })
    })
}
