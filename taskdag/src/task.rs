// src/task.rs

//! The per-task record carried through transforms and graph phases.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, TaskdagError};
use crate::graph::Label;

/// A concrete task: the unit the generator assembles into graphs and
/// ultimately submits.
///
/// Tasks are mutated only while flowing through one kind's transform
/// pipeline. Once the full task graph is assembled they are frozen; the
/// only later rewrites are the optimizer pointing dependency entries at
/// replacement task ids (on a cloned graph) and morphs editing the
/// wire-format definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Name of the kind that emitted this task.
    pub kind: String,

    /// Globally unique label, conventionally `<kind>-<name>`.
    pub label: String,

    /// Free-form attributes consulted by filters, optimizers and other
    /// transforms.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// Edge name to dependency label.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Label>,

    /// Labels that must exist in the full graph if this task is kept, but
    /// are not pulled into the target graph.
    #[serde(default)]
    pub soft_dependencies: BTreeSet<Label>,

    /// Labels of the primary dependencies: this task only runs if at least
    /// one of them survives optimization.
    #[serde(default)]
    pub if_dependencies: Vec<Label>,

    /// `strategy-name -> argument`, or empty for "always run".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<BTreeMap<String, Value>>,

    /// The wire-format payload submitted to the execution platform. Opaque
    /// to the core except for a handful of well-known keys (`routes`,
    /// `dependencies`, `requires`, `taskGroupId`) used by morphs.
    #[serde(rename = "task")]
    pub task_definition: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Assigned by the optimizer when the final graph is laid out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Task {
    /// Build a `Task` from the mapping a kind's transform pipeline emitted.
    pub fn from_task_dict(kind: &str, mut task_dict: serde_json::Map<String, Value>) -> Result<Task> {
        let label = take_string(&mut task_dict, "label").ok_or_else(|| TaskdagError::Transform {
            kind: kind.to_string(),
            label: None,
            message: "emitted task has no 'label'".to_string(),
        })?;

        let err = |message: String| TaskdagError::Transform {
            kind: kind.to_string(),
            label: Some(label.clone()),
            message,
        };

        let attributes = match task_dict.remove("attributes") {
            Some(Value::Object(map)) => map.into_iter().collect(),
            Some(other) => return Err(err(format!("'attributes' must be a mapping, got {other}"))),
            None => BTreeMap::new(),
        };

        let mut dependencies = BTreeMap::new();
        if let Some(value) = task_dict.remove("dependencies") {
            let map = value
                .as_object()
                .ok_or_else(|| err("'dependencies' must be a mapping".to_string()))?;
            for (edge, dep) in map {
                let dep = dep
                    .as_str()
                    .ok_or_else(|| err(format!("dependency '{edge}' must name a label")))?;
                dependencies.insert(edge.clone(), dep.to_string());
            }
        }

        let soft_dependencies = string_list(task_dict.remove("soft-dependencies"))
            .map_err(|m| err(format!("'soft-dependencies' {m}")))?
            .into_iter()
            .collect();
        let if_dependencies = string_list(task_dict.remove("if-dependencies"))
            .map_err(|m| err(format!("'if-dependencies' {m}")))?;

        let optimization = match task_dict.remove("optimization") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map.into_iter().collect()),
            Some(other) => {
                return Err(err(format!("'optimization' must be a mapping, got {other}")))
            }
        };

        let task_definition = task_dict
            .remove("task")
            .ok_or_else(|| err("emitted task has no 'task' definition".to_string()))?;

        let description = take_string(&mut task_dict, "description");

        Ok(Task {
            kind: kind.to_string(),
            label,
            attributes,
            dependencies,
            soft_dependencies,
            if_dependencies,
            optimization,
            task_definition,
            description,
            task_id: None,
        })
    }
}

fn take_string(map: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn string_list(value: Option<Value>) -> std::result::Result<Vec<String>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(format!("must contain labels, got {other}")),
            })
            .collect(),
        Some(other) => Err(format!("must be a list, got {other}")),
    }
}
