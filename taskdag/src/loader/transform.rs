// src/loader/transform.rs

//! The transform loader: enumerate `tasks` plus any `tasks-from` files,
//! merge each entry over `task-defaults`, and hand the results to the
//! kind's transform pipeline as-is.

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, TaskdagError};
use crate::kind::Kind;
use crate::transforms::{TaskStub, TransformConfig};
use crate::util::merge::deep_merge;
use crate::util::yaml::load_yaml;

use super::LoadedKind;

pub fn loader(kind: &Kind, config: &TransformConfig) -> Result<LoadedKind> {
    Ok(LoadedKind {
        stubs: load_stubs(kind, config)?,
        transform_references: kind.transform_references(),
    })
}

pub(super) fn load_stubs(kind: &Kind, config: &TransformConfig) -> Result<Vec<TaskStub>> {
    let kind_defaults = config.config.get("task-defaults").cloned();

    let mut stubs: Vec<TaskStub> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    if let Some(tasks) = config.config.get("tasks") {
        collect(kind, &mut stubs, &mut seen, tasks, kind_defaults.as_ref())?;
    }

    for filename in tasks_from(&config.config) {
        let path = kind.path.join(&filename);
        let contents = load_yaml(&path)
            .map_err(|e| loader_error(kind, format!("tasks-from file '{filename}': {e}")))?;

        // File-level defaults layer over the kind-level ones for that
        // file's tasks.
        let file_defaults = contents.get("task-defaults").cloned();
        let effective_defaults = match (&kind_defaults, &file_defaults) {
            (Some(kind_d), Some(file_d)) => Some(deep_merge(kind_d, file_d)),
            (Some(d), None) | (None, Some(d)) => Some(d.clone()),
            (None, None) => None,
        };

        match contents.get("tasks") {
            Some(tasks) => {
                collect(kind, &mut stubs, &mut seen, tasks, effective_defaults.as_ref())?
            }
            None => {
                return Err(loader_error(
                    kind,
                    format!("tasks-from file '{filename}' defines no tasks"),
                ))
            }
        }
    }

    Ok(stubs)
}

/// Merge and append one `tasks` mapping's entries, rejecting duplicate
/// names.
fn collect(
    kind: &Kind,
    stubs: &mut Vec<TaskStub>,
    seen: &mut Vec<String>,
    tasks: &Value,
    defaults: Option<&Value>,
) -> Result<()> {
    let Some(tasks) = tasks.as_object() else {
        return Err(loader_error(kind, "'tasks' must be a mapping".to_string()));
    };

    for (name, stub) in tasks {
        if seen.contains(name) {
            return Err(loader_error(kind, format!("duplicate task name '{name}'")));
        }
        seen.push(name.clone());

        let merged = match defaults {
            Some(defaults) => deep_merge(defaults, stub),
            None => stub.clone(),
        };
        let Value::Object(mut merged) = merged else {
            return Err(loader_error(kind, format!("task '{name}' is not a mapping")));
        };
        merged.insert("name".to_string(), Value::String(name.clone()));
        debug!(kind = %kind.name, task = %name, "loaded task stub");
        stubs.push(merged);
    }

    Ok(())
}

fn tasks_from(config: &Value) -> Vec<String> {
    config
        .get("tasks-from")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn loader_error(kind: &Kind, message: String) -> TaskdagError {
    TaskdagError::Loader {
        kind: kind.name.clone(),
        message,
    }
}
