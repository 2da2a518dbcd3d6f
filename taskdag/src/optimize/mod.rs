// src/optimize/mod.rs

//! The two-phase removal/replacement engine.
//!
//! The optimizer reduces the target+deps graph by either *removing* a task
//! (its work does not need to run) or *replacing* it with the id of a
//! previously computed task. Removal visits dependents before their
//! dependencies; replacement visits dependencies first, because a task is
//! only substitutable when everything below it was. The surviving tasks
//! are laid out into the final graph with concrete task ids.
//!
//! Strategy failures are not fatal: a raising strategy is logged, recorded
//! in the optimization log, and treated as "cannot optimize".

pub mod strategies;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{Result, TaskdagError};
use crate::graph::{Graph, Label};
use crate::parameters::Parameters;
use crate::platform::{find_task_ids_batched, PlatformClient, TaskStatus};
use crate::task::Task;
use crate::taskgraph::TaskGraph;
use crate::util::slugid::slugid;
use crate::util::task_references::resolve_task_references;
use crate::util::time::parse_time;

/// Answer of a replacement strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// Do not replace; the task may still be removed or kept.
    No,
    /// The task's effect is already in place and nothing needs to point at
    /// it: drop it entirely.
    WithNothing,
    /// Substitute the given task id.
    With(String),
}

/// Batched platform answers gathered before the replacement pass, so
/// individual strategies never issue their own queries.
#[derive(Debug, Default, Clone)]
pub struct ReplacementContext {
    pub index_to_taskid: BTreeMap<String, String>,
    pub taskid_to_status: BTreeMap<String, TaskStatus>,
}

/// A removal/replacement strategy. Implementations typically give one of
/// the two queries a non-trivial answer and leave the other at its
/// default.
pub trait OptimizationStrategy: Send + Sync {
    fn should_remove_task(&self, _task: &Task, _params: &Parameters, _arg: &Value) -> Result<bool> {
        Ok(false)
    }

    fn should_replace_task(
        &self,
        _task: &Task,
        _params: &Parameters,
        _deadline: Option<&DateTime<Utc>>,
        _arg: &Value,
        _ctx: &ReplacementContext,
    ) -> Result<Replacement> {
        Ok(Replacement::No)
    }

    /// Contribute the index paths this strategy would query for the given
    /// argument, so the engine can batch the lookups.
    fn gather_index_paths(&self, _arg: &Value, _out: &mut BTreeSet<String>) {}
}

/// One decision of the optimizer, for the structured optimization log.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRecord {
    pub label: Label,
    /// `removed`, `replaced` or `kept`.
    pub action: String,
    /// The strategy (or engine rule) that decided.
    pub by: String,
}

/// Everything the optimizer needs besides the graph itself.
pub struct OptimizeInputs<'a> {
    pub params: &'a Parameters,
    pub do_not_optimize: &'a BTreeSet<Label>,
    pub existing_tasks: &'a BTreeMap<Label, String>,
    pub strategies: &'a BTreeMap<String, Arc<dyn OptimizationStrategy>>,
    pub client: &'a dyn PlatformClient,
    pub decision_task_id: &'a str,
}

type Optimizations<'a> = BTreeMap<Label, Option<(String, &'a Arc<dyn OptimizationStrategy>, Value)>>;

/// Run the full optimization: removal, replacement, then subgraph layout.
/// Returns the optimized graph, the label→taskid assignment, and the
/// decision log.
pub fn optimize_task_graph(
    target_task_graph: &TaskGraph,
    inputs: &OptimizeInputs,
) -> Result<(TaskGraph, BTreeMap<Label, String>, Vec<OptimizationRecord>)> {
    let optimizations = get_optimizations(target_task_graph, inputs.strategies)?;
    let mut log: Vec<OptimizationRecord> = Vec::new();

    let removed = remove_tasks(target_task_graph, inputs, &optimizations, &mut log)?;

    let mut label_to_taskid: BTreeMap<Label, String> = BTreeMap::new();
    let mut removed = removed;
    let replaced = replace_tasks(
        target_task_graph,
        inputs,
        &optimizations,
        &mut removed,
        &mut label_to_taskid,
        &mut log,
    )?;

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &log {
        *counts.entry(record.action.as_str()).or_default() += 1;
    }
    info!(
        removed = counts.get("removed").copied().unwrap_or(0),
        replaced = counts.get("replaced").copied().unwrap_or(0),
        total = target_task_graph.len(),
        "optimization complete"
    );

    let subgraph = get_subgraph(
        target_task_graph,
        &removed,
        &replaced,
        &mut label_to_taskid,
        inputs.decision_task_id,
    )?;

    Ok((subgraph, label_to_taskid, log))
}

/// Resolve each task's optimization spec against the strategy registry.
fn get_optimizations<'a>(
    graph: &TaskGraph,
    strategies: &'a BTreeMap<String, Arc<dyn OptimizationStrategy>>,
) -> Result<Optimizations<'a>> {
    let mut optimizations = BTreeMap::new();
    for (label, task) in &graph.tasks {
        let entry = match &task.optimization {
            None => None,
            Some(spec) => {
                if spec.len() != 1 {
                    return Err(TaskdagError::Optimizer(format!(
                        "task '{label}' has an optimization spec with {} strategies; exactly one is allowed",
                        spec.len()
                    )));
                }
                let (name, arg) = spec.iter().next().expect("len checked");
                let strategy = strategies.get(name).ok_or_else(|| {
                    TaskdagError::Optimizer(format!(
                        "task '{label}' uses unknown optimization strategy '{name}'"
                    ))
                })?;
                Some((name.clone(), strategy, arg.clone()))
            }
        };
        optimizations.insert(label.clone(), entry);
    }
    Ok(optimizations)
}

/// The removal phase.
///
/// Visits dependents before dependencies. A task kept only because its
/// `if_dependencies` are still undecided (a *prune candidate*) does not
/// block removal of the tasks below it. Whenever a candidate turns out to
/// be genuinely kept, the pass is re-run with that task pinned, until the
/// set of pinned tasks stops growing.
fn remove_tasks(
    graph: &TaskGraph,
    inputs: &OptimizeInputs,
    optimizations: &Optimizations,
    log: &mut Vec<OptimizationRecord>,
) -> Result<BTreeSet<Label>> {
    let dependents_of = graph.graph.reverse_links_dict();
    let preorder = graph.graph.visit_preorder()?;

    let mut pinned: BTreeSet<Label> = BTreeSet::new();

    loop {
        let mut removed: BTreeSet<Label> = BTreeSet::new();
        let mut prune_candidates: BTreeSet<Label> = BTreeSet::new();
        let mut pass_log: Vec<OptimizationRecord> = Vec::new();

        for label in &preorder {
            let task = &graph.tasks[label];

            // Dependents that might still disappear with their
            // if-dependencies; they do not pin this task in place.
            let prune_deps: BTreeSet<&Label> = dependents_of
                .get(label)
                .map(|deps| {
                    deps.iter()
                        .filter(|d| {
                            prune_candidates.contains(*d)
                                && !graph.tasks[*d].if_dependencies.is_empty()
                        })
                        .collect()
                })
                .unwrap_or_default();

            // Seeded replacements are decided before any strategy runs;
            // the replacement pass substitutes them unconditionally.
            if inputs.existing_tasks.contains_key(label) {
                continue;
            }

            if inputs.do_not_optimize.contains(label) {
                pass_log.push(record(label, "kept", "do-not-optimize"));
                continue;
            }

            let blocked = dependents_of
                .get(label)
                .map(|deps| {
                    deps.iter()
                        .any(|d| !removed.contains(d) && !prune_deps.contains(d))
                })
                .unwrap_or(false);
            if blocked {
                pass_log.push(record(label, "kept", "dependent-tasks"));
                continue;
            }

            if let Some((name, strategy, arg)) = &optimizations[label] {
                match strategy.should_remove_task(task, inputs.params, arg) {
                    Ok(true) => {
                        removed.insert(label.clone());
                        pass_log.push(record(label, "removed", name));
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(label = %label, strategy = %name, error = %e,
                              "removal strategy failed; keeping task");
                        pass_log.push(record(label, "kept", &format!("{name} (failed)")));
                        continue;
                    }
                }
            }

            if !task.if_dependencies.is_empty() && !pinned.contains(label) {
                prune_candidates.insert(label.clone());
            }
        }

        // Decide the fate of the candidates: gone once every one of their
        // primary dependencies is gone. Removing one candidate can doom
        // another (chains of if-dependencies), so iterate to a fixed point.
        loop {
            let mut shrunk = false;
            for label in prune_candidates.clone() {
                let task = &graph.tasks[&label];
                if task.if_dependencies.iter().all(|dep| removed.contains(dep)) {
                    removed.insert(label.clone());
                    prune_candidates.remove(&label);
                    pass_log.push(record(&label, "removed", "if-dependencies"));
                    shrunk = true;
                }
            }
            if !shrunk {
                break;
            }
        }

        // Whatever candidates survive are genuinely kept; pin them and
        // re-evaluate, since a pinned task blocks its dependencies.
        let mut changed = false;
        for label in prune_candidates {
            if pinned.insert(label) {
                changed = true;
            }
        }

        if !changed {
            log.extend(pass_log);
            return Ok(removed);
        }
    }
}

/// The replacement phase. Mutates `removed` when a strategy answers
/// "replace with nothing".
fn replace_tasks(
    graph: &TaskGraph,
    inputs: &OptimizeInputs,
    optimizations: &Optimizations,
    removed: &mut BTreeSet<Label>,
    label_to_taskid: &mut BTreeMap<Label, String>,
    log: &mut Vec<OptimizationRecord>,
) -> Result<BTreeSet<Label>> {
    let links = graph.graph.links_dict();
    let dependents_of = graph.graph.reverse_links_dict();
    let postorder = graph.graph.visit_postorder()?;

    let ctx = prefetch(graph, inputs, optimizations, removed)?;

    let mut replaced: BTreeSet<Label> = BTreeSet::new();

    // Deadlines of dependents decide whether a cached artifact lives long
    // enough; resolved lazily and cached per label.
    let mut deadlines: BTreeMap<Label, Option<DateTime<Utc>>> = BTreeMap::new();

    for label in &postorder {
        if removed.contains(label) {
            continue;
        }

        // Seeded replacements bypass everything else.
        if let Some(task_id) = inputs.existing_tasks.get(label) {
            label_to_taskid.insert(label.clone(), task_id.clone());
            replaced.insert(label.clone());
            log.push(record(label, "replaced", "existing-tasks"));
            continue;
        }

        if inputs.do_not_optimize.contains(label) {
            continue;
        }

        // A task whose dependencies still run must run too.
        let has_live_deps = links
            .get(label)
            .map(|deps| {
                deps.iter()
                    .any(|d| !replaced.contains(d) && !removed.contains(d))
            })
            .unwrap_or(false);
        if has_live_deps {
            continue;
        }

        let Some((name, strategy, arg)) = &optimizations[label] else {
            continue;
        };

        let deadline = max_dependent_deadline(
            graph,
            &dependents_of,
            label,
            &mut deadlines,
        );

        let task = &graph.tasks[label];
        match strategy.should_replace_task(task, inputs.params, deadline.as_ref(), arg, &ctx) {
            Ok(Replacement::With(task_id)) => {
                label_to_taskid.insert(label.clone(), task_id);
                replaced.insert(label.clone());
                log.push(record(label, "replaced", name));
            }
            Ok(Replacement::WithNothing) => {
                removed.insert(label.clone());
                log.push(record(label, "removed", &format!("{name} (replaced with nothing)")));
            }
            Ok(Replacement::No) => {}
            Err(e) => {
                warn!(label = %label, strategy = %name, error = %e,
                      "replacement strategy failed; not replacing");
                log.push(record(label, "kept", &format!("{name} (failed)")));
            }
        }
    }

    Ok(replaced)
}

/// Gather every index path the replacement pass could query and resolve
/// them in batch.
fn prefetch(
    graph: &TaskGraph,
    inputs: &OptimizeInputs,
    optimizations: &Optimizations,
    removed: &BTreeSet<Label>,
) -> Result<ReplacementContext> {
    let mut index_paths: BTreeSet<String> = BTreeSet::new();
    for label in graph.tasks.keys() {
        if removed.contains(label) || inputs.do_not_optimize.contains(label) {
            continue;
        }
        if let Some((_, strategy, arg)) = &optimizations[label] {
            strategy.gather_index_paths(arg, &mut index_paths);
        }
    }

    if index_paths.is_empty() {
        return Ok(ReplacementContext::default());
    }

    let index_to_taskid = find_task_ids_batched(inputs.client, index_paths)?;
    let task_ids: Vec<String> = index_to_taskid.values().cloned().collect();
    let taskid_to_status = inputs.client.get_task_statuses(&task_ids)?;

    Ok(ReplacementContext {
        index_to_taskid,
        taskid_to_status,
    })
}

/// The latest deadline among a task's dependents; a replacement must
/// outlive it.
fn max_dependent_deadline(
    graph: &TaskGraph,
    dependents_of: &BTreeMap<Label, BTreeSet<Label>>,
    label: &Label,
    cache: &mut BTreeMap<Label, Option<DateTime<Utc>>>,
) -> Option<DateTime<Utc>> {
    if let Some(deadline) = cache.get(label) {
        return *deadline;
    }

    let deadline = dependents_of
        .get(label)
        .into_iter()
        .flatten()
        .filter_map(|dependent| {
            graph.tasks[dependent]
                .task_definition
                .get("deadline")
                .and_then(|v| v.as_str())
                .and_then(|s| parse_time(s).ok())
        })
        .max();

    cache.insert(label.clone(), deadline);
    deadline
}

/// Lay out the surviving tasks into the final graph: assign task ids,
/// stitch replacement ids into downstream dependency references, and
/// resolve task-reference wrappers in the wire format.
fn get_subgraph(
    target_task_graph: &TaskGraph,
    removed: &BTreeSet<Label>,
    replaced: &BTreeSet<Label>,
    label_to_taskid: &mut BTreeMap<Label, String>,
    decision_task_id: &str,
) -> Result<TaskGraph> {
    // No surviving task may depend on a removed-and-not-replaced label.
    let bad_edges: Vec<String> = target_task_graph
        .graph
        .edges()
        .iter()
        .filter(|(left, right, _)| !removed.contains(left) && removed.contains(right))
        .map(|(left, right, name)| {
            format!("'{left}' depends on '{right}' as '{name}' but it has been removed")
        })
        .collect();
    if !bad_edges.is_empty() {
        return Err(TaskdagError::Optimizer(bad_edges.join("; ")));
    }

    // Assign fresh ids to everything that survived un-replaced.
    for label in target_task_graph.graph.nodes() {
        if !removed.contains(label) && !label_to_taskid.contains_key(label) {
            label_to_taskid.insert(label.clone(), slugid());
        }
    }

    let named_links = target_task_graph.graph.named_links_dict();
    let omit: BTreeSet<&Label> = removed.iter().chain(replaced.iter()).collect();

    let mut tasks: BTreeMap<Label, Task> = BTreeMap::new();
    for (label, task) in &target_task_graph.tasks {
        if omit.contains(label) {
            continue;
        }

        let mut task = task.clone();
        let task_id = label_to_taskid[label].clone();
        task.task_id = Some(task_id.clone());

        // Dependency ids the wire format will carry, and the id each edge
        // name resolves to for task-reference substitution.
        let mut named_ids: BTreeMap<String, String> = BTreeMap::new();
        for (edge, dep) in named_links.get(label).into_iter().flatten() {
            named_ids.insert(edge.clone(), label_to_taskid[dep].clone());
        }

        // Surviving soft dependencies ride along as plain dependencies.
        let mut dep_ids: BTreeSet<String> = named_ids.values().cloned().collect();
        for soft in &task.soft_dependencies {
            if !omit.contains(soft) {
                if let Some(id) = label_to_taskid.get(soft) {
                    dep_ids.insert(id.clone());
                }
            }
        }

        // Point the task record's edges at replacement ids.
        for dep in task.dependencies.values_mut() {
            if replaced.contains(dep) {
                *dep = label_to_taskid[dep].clone();
            }
        }

        let mut task_def = resolve_task_references(
            label,
            &task.task_definition,
            &task_id,
            decision_task_id,
            &named_ids,
        )?;
        if let Some(map) = task_def.as_object_mut() {
            map.insert(
                "dependencies".to_string(),
                Value::Array(dep_ids.into_iter().map(Value::String).collect()),
            );
        }
        task.task_definition = task_def;

        tasks.insert(label.clone(), task);
    }

    let edges = target_task_graph
        .graph
        .edges()
        .iter()
        .filter(|(left, right, _)| tasks.contains_key(left) && tasks.contains_key(right))
        .cloned();
    let graph = Graph::new(tasks.keys().cloned(), edges);

    Ok(TaskGraph::new(tasks, graph))
}

fn record(label: &str, action: &str, by: &str) -> OptimizationRecord {
    OptimizationRecord {
        label: label.to_string(),
        action: action.to_string(),
        by: by.to_string(),
    }
}
