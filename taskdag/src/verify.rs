// src/verify.rs

//! Post-phase verifications.
//!
//! Each generation phase is checked against a small set of structural
//! rules before the next phase consumes it. Verifications are advisory in
//! shape (each is a named check over the phase's graph) but failures are
//! fatal; `--no-verify` disables the lot for debugging.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::GraphConfig;
use crate::errors::{Result, TaskdagError};
use crate::parameters::Parameters;
use crate::taskgraph::TaskGraph;

pub struct Verifications {
    enabled: bool,
}

impl Verifications {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Run the checks wired to the named phase.
    pub fn verify(
        &self,
        phase: &str,
        graph: &TaskGraph,
        graph_config: &GraphConfig,
        params: &Parameters,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        debug!(phase, "running verifications");

        match phase {
            "full_task_graph" => {
                verify_dependency_limits(graph, graph_config)?;
                verify_treeherder_symbols(graph)?;
                verify_index_route_uniqueness(graph)?;
                verify_always_target(graph, params)?;
            }
            "optimized_task_graph" => {
                verify_dependency_limits(graph, graph_config)?;
            }
            "morphed_task_graph" => {
                verify_route_limits(graph, graph_config)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// No task may exceed the platform's dependency limit.
fn verify_dependency_limits(graph: &TaskGraph, graph_config: &GraphConfig) -> Result<()> {
    let max = graph_config.max_dependencies() as usize;
    for (label, task) in &graph.tasks {
        if task.dependencies.len() > max {
            return Err(TaskdagError::Dependency(format!(
                "task '{label}' has {} dependencies; the platform limit is {max}",
                task.dependencies.len()
            )));
        }
    }
    Ok(())
}

/// No task may exceed the platform's route limit once morphs have run.
fn verify_route_limits(graph: &TaskGraph, graph_config: &GraphConfig) -> Result<()> {
    let max = graph_config.max_routes() as usize;
    for (label, task) in &graph.tasks {
        let routes = task
            .task_definition
            .get("routes")
            .and_then(|v| v.as_array())
            .map(|r| r.len())
            .unwrap_or(0);
        if routes > max {
            return Err(TaskdagError::Config(format!(
                "task '{label}' has {routes} routes; the platform limit is {max}"
            )));
        }
    }
    Ok(())
}

/// Treeherder symbols must be unique per platform, or the display collapses
/// two tasks into one cell.
fn verify_treeherder_symbols(graph: &TaskGraph) -> Result<()> {
    let mut seen: BTreeMap<(String, String), &str> = BTreeMap::new();
    for (label, task) in &graph.tasks {
        let Some(treeherder) = task.task_definition.get("extra").and_then(|e| e.get("treeherder"))
        else {
            continue;
        };
        let platform = treeherder
            .get("machine")
            .and_then(|m| m.get("platform"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let group = treeherder
            .get("groupSymbol")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let symbol = treeherder
            .get("symbol")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let key = (platform, format!("{group}({symbol})"));

        if let Some(existing) = seen.get(&key) {
            return Err(TaskdagError::Config(format!(
                "conflicting treeherder symbol {}({}) between '{existing}' and '{label}'",
                key.1, key.0
            )));
        }
        seen.insert(key, label);
    }
    Ok(())
}

/// Two tasks inserting the same index route would race each other.
fn verify_index_route_uniqueness(graph: &TaskGraph) -> Result<()> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for (label, task) in &graph.tasks {
        let Some(routes) = task.task_definition.get("routes").and_then(|v| v.as_array()) else {
            continue;
        };
        for route in routes.iter().filter_map(|r| r.as_str()) {
            if !route.starts_with("index.") {
                continue;
            }
            if let Some(existing) = seen.get(route) {
                return Err(TaskdagError::Config(format!(
                    "conflicting index route '{route}' between '{existing}' and '{label}'"
                )));
            }
            seen.insert(route, label);
        }
    }
    Ok(())
}

/// Flag `always_target` attributes that are dead because
/// `enable_always_target` is off.
fn verify_always_target(graph: &TaskGraph, params: &Parameters) -> Result<()> {
    let enabled = params
        .get("enable_always_target")
        .map(|v| !matches!(v, serde_json::Value::Bool(false)))
        .unwrap_or(false);
    if enabled {
        return Ok(());
    }
    for (label, task) in &graph.tasks {
        if task
            .attributes
            .get("always_target")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            tracing::warn!(
                task = %label,
                "always_target is set but enable_always_target is false"
            );
        }
    }
    Ok(())
}
