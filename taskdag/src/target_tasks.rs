// src/target_tasks.rs

//! Target-task methods and filters: which of the full graph's tasks the
//! project actually asked for.

use tracing::info;

use crate::config::GraphConfig;
use crate::errors::Result;
use crate::graph::Label;
use crate::parameters::Parameters;
use crate::registry::Registries;
use crate::task::Task;
use crate::taskgraph::TaskGraph;
use crate::util::attributes::{match_run_on_git_branches, match_run_on_projects};

pub fn register_builtins(registries: &mut Registries) -> Result<()> {
    registries.register_target_method("default", target_tasks_default)?;
    registries.register_target_method("all", target_tasks_all)?;
    registries.register_target_method("nothing", target_tasks_nothing)?;
    registries.register_filter("target_tasks_method", filter_target_tasks_method)?;
    Ok(())
}

/// The standard opt-in filter: a task runs when its `run_on_projects` and
/// `run_on_git_branches` attributes admit the triggering push.
pub fn standard_filter(task: &Task, params: &Parameters) -> Result<bool> {
    let run_on_projects: Vec<String> = task
        .attributes
        .get("run_on_projects")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_else(|| vec!["all".to_string()]);
    if !match_run_on_projects(params.str("project")?, &run_on_projects) {
        return Ok(false);
    }

    let run_on_git_branches: Vec<String> = task
        .attributes
        .get("run_on_git_branches")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_else(|| vec!["all".to_string()]);
    if params.str("repository_type")? == "git"
        && !match_run_on_git_branches(params.str("head_ref")?, &run_on_git_branches)?
    {
        return Ok(false);
    }

    Ok(true)
}

/// Target the tasks that opted into this project via their attributes.
fn target_tasks_default(
    full_task_graph: &TaskGraph,
    params: &Parameters,
    _graph_config: &GraphConfig,
) -> Result<Vec<Label>> {
    let mut targets = Vec::new();
    for (label, task) in &full_task_graph.tasks {
        if standard_filter(task, params)? {
            targets.push(label.clone());
        }
    }
    Ok(targets)
}

/// Target every task in the graph.
fn target_tasks_all(
    full_task_graph: &TaskGraph,
    _params: &Parameters,
    _graph_config: &GraphConfig,
) -> Result<Vec<Label>> {
    Ok(full_task_graph.tasks.keys().cloned().collect())
}

/// Target nothing; used for pushes that should only record the decision.
fn target_tasks_nothing(
    _full_task_graph: &TaskGraph,
    _params: &Parameters,
    _graph_config: &GraphConfig,
) -> Result<Vec<Label>> {
    Ok(Vec::new())
}

/// The standard filter chain entry: delegate to the configured
/// `target_tasks_method`.
fn filter_target_tasks_method(
    graph: &TaskGraph,
    params: &Parameters,
    graph_config: &GraphConfig,
    registries: &Registries,
) -> Result<Vec<Label>> {
    let method = params.str("target_tasks_method")?;
    info!(method, "selecting target tasks");
    let method = registries.target_method(method)?;
    method(graph, params, graph_config)
}
