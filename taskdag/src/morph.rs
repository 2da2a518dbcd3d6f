// src/morph.rs

//! Late-stage transforms of the wire-format definitions.
//!
//! Morphs run after optimization and mutate only the wire format (they may
//! also add helper tasks with generated labels and ids). They run in
//! registration order; several touch overlapping fields, so the order is
//! part of the contract.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::GraphConfig;
use crate::errors::{Result, TaskdagError};
use crate::graph::{Graph, Label};
use crate::parameters::Parameters;
use crate::registry::Registries;
use crate::task::Task;
use crate::taskgraph::TaskGraph;
use crate::util::slugid::slugid;

/// Collaborator performing expression-language substitution for the
/// `apply-jsone` morph; the engine itself is agnostic about the language.
pub trait ExpressionEvaluator: Send + Sync {
    fn render(&self, template: &Value, context: &Value) -> Result<Value>;
}

pub struct MorphContext<'a> {
    pub params: &'a Parameters,
    pub graph_config: &'a GraphConfig,
    pub registries: &'a Registries,
    pub decision_task_id: &'a str,
}

pub type MorphFn =
    fn(&mut TaskGraph, &mut BTreeMap<Label, String>, &MorphContext) -> Result<()>;

pub fn register_builtins(registries: &mut Registries) -> Result<()> {
    registries.register_morph("make-index-task", make_index_tasks)?;
    registries.register_morph("add-chain-of-trust", add_chain_of_trust)?;
    registries.register_morph("apply-jsone", apply_jsone)?;
    Ok(())
}

/// Run every registered morph, then stamp the decision task's id as the
/// `taskGroupId` of each definition.
pub fn morph(
    mut taskgraph: TaskGraph,
    mut label_to_taskid: BTreeMap<Label, String>,
    ctx: &MorphContext,
) -> Result<(TaskGraph, BTreeMap<Label, String>)> {
    for (name, morph_fn) in ctx.registries.morphs() {
        debug!(morph = %name, "applying morph");
        morph_fn(&mut taskgraph, &mut label_to_taskid, ctx)?;
    }

    for task in taskgraph.tasks.values_mut() {
        if let Some(def) = task.task_definition.as_object_mut() {
            def.entry("taskGroupId".to_string())
                .or_insert_with(|| json!(ctx.decision_task_id));
        }
    }

    Ok((taskgraph, label_to_taskid))
}

/// Collapse excess index routes into a helper task that inserts them at
/// run time.
///
/// The platform caps the number of routes on a task. When a task carries
/// more `index.` routes than fit, they are moved onto a small follow-up
/// task that performs the index insertions itself, using scopes derived
/// from the `index-path-regexes` configuration.
fn make_index_tasks(
    taskgraph: &mut TaskGraph,
    label_to_taskid: &mut BTreeMap<Label, String>,
    ctx: &MorphContext,
) -> Result<()> {
    let max_routes = ctx.graph_config.max_routes() as usize;
    let path_regexes: Vec<Regex> = ctx
        .graph_config
        .index_path_regexes()
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                TaskdagError::Config(format!("invalid index-path-regex {p:?}: {e}"))
            })
        })
        .collect::<Result<_>>()?;

    let mut added: Vec<Task> = Vec::new();

    for task in taskgraph.tasks.values_mut() {
        let Some(def) = task.task_definition.as_object_mut() else {
            continue;
        };
        let Some(Value::Array(routes)) = def.get("routes") else {
            continue;
        };
        if routes.len() <= max_routes {
            continue;
        }

        // Only index routes can be deferred; everything else must stay.
        let (index_routes, kept): (Vec<Value>, Vec<Value>) = routes
            .iter()
            .cloned()
            .partition(|r| r.as_str().is_some_and(|r| r.starts_with("index.")));
        if kept.len() > max_routes {
            return Err(TaskdagError::Optimizer(format!(
                "task '{}' has {} non-index routes; the platform limit is {max_routes}",
                task.label,
                kept.len()
            )));
        }

        let paths: Vec<String> = index_routes
            .iter()
            .filter_map(|r| r.as_str())
            .map(|r| r.trim_start_matches("index.").to_string())
            .collect();

        let mut scopes: Vec<Value> = Vec::new();
        for path in &paths {
            let prefix = path_regexes
                .iter()
                .find_map(|re| re.captures(path).and_then(|c| c.get(1)))
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| {
                    TaskdagError::Optimizer(format!(
                        "index path '{path}' matches no configured index-path-regex"
                    ))
                })?;
            let scope = Value::String(format!("index:insert-task:{prefix}.*"));
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        def.insert("routes".to_string(), Value::Array(kept));

        let parent_id = task.task_id.clone().ok_or_else(|| {
            TaskdagError::Optimizer(format!("task '{}' has no assigned id", task.label))
        })?;
        let index_label = format!("index-task-{}", task.label);
        info!(task = %task.label, routes = paths.len(), "deferring index routes to helper task");

        let mut index_def = Map::new();
        for key in ["provisionerId", "workerType", "created", "deadline", "expires", "priority"] {
            if let Some(value) = def.get(key) {
                index_def.insert(key.to_string(), value.clone());
            }
        }
        index_def.insert(
            "metadata".to_string(),
            json!({
                "name": index_label,
                "description": format!("Index insertions for {}", task.label),
                "owner": ctx.params.str("owner")?,
                "source": ctx.params.str("head_repository")?,
            }),
        );
        index_def.insert("dependencies".to_string(), json!([parent_id]));
        index_def.insert("requires".to_string(), json!("all-completed"));
        index_def.insert("scopes".to_string(), Value::Array(scopes));
        index_def.insert(
            "payload".to_string(),
            json!({
                "command": ["insert-indexes", "--target-task", parent_id],
                "env": {
                    "TARGET_TASKID": parent_id,
                    "INDEXES": serde_json::to_string(&paths)?,
                },
                "maxRunTime": 600,
            }),
        );

        added.push(Task {
            kind: "misc".to_string(),
            label: index_label,
            attributes: BTreeMap::new(),
            dependencies: [("parent".to_string(), task.label.clone())].into(),
            soft_dependencies: Default::default(),
            if_dependencies: Vec::new(),
            optimization: None,
            task_definition: Value::Object(index_def),
            description: None,
            task_id: Some(slugid()),
        });
    }

    if added.is_empty() {
        return Ok(());
    }

    let mut nodes: Vec<Label> = taskgraph.tasks.keys().cloned().collect();
    let mut edges: Vec<(Label, Label, String)> =
        taskgraph.graph.edges().iter().cloned().collect();
    for task in added {
        label_to_taskid.insert(
            task.label.clone(),
            task.task_id.clone().expect("id assigned above"),
        );
        nodes.push(task.label.clone());
        edges.push((
            task.label.clone(),
            task.dependencies["parent"].clone(),
            "parent".to_string(),
        ));
        taskgraph.tasks.insert(task.label.clone(), task);
    }
    taskgraph.graph = Graph::new(nodes, edges);

    Ok(())
}

/// Turn on the chain-of-trust feature wherever the graph relies on cached
/// artifacts, so downstream consumers can verify their provenance.
fn add_chain_of_trust(
    taskgraph: &mut TaskGraph,
    _label_to_taskid: &mut BTreeMap<Label, String>,
    _ctx: &MorphContext,
) -> Result<()> {
    for task in taskgraph.tasks.values_mut() {
        if !task.attributes.contains_key("cached_task") {
            continue;
        }
        let Some(def) = task.task_definition.as_object_mut() else {
            continue;
        };
        let payload = def
            .entry("payload".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(payload) = payload.as_object_mut() {
            let features = payload
                .entry("features".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(features) = features.as_object_mut() {
                features.insert("chainOfTrust".to_string(), json!(true));
            }
        }
    }
    Ok(())
}

/// Delegate a final expression-language substitution to the registered
/// evaluator, if any.
fn apply_jsone(
    taskgraph: &mut TaskGraph,
    _label_to_taskid: &mut BTreeMap<Label, String>,
    ctx: &MorphContext,
) -> Result<()> {
    let Some(evaluator) = ctx.registries.expression_evaluator() else {
        return Ok(());
    };

    for task in taskgraph.tasks.values_mut() {
        let context = json!({
            "task": { "label": task.label, "kind": task.kind },
            "parameters": ctx.params.to_json(),
        });
        task.task_definition = evaluator.render(&task.task_definition, &context)?;
    }
    Ok(())
}
