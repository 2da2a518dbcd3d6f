// src/generator.rs

//! The central controller: drives the six generation phases and exposes
//! each intermediate artifact.
//!
//! Phases are computed on first access and memoized, so a caller that only
//! needs the target set never pays for optimization, while a caller of the
//! morphed graph forces everything before it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{load_graph_config, GraphConfig};
use crate::errors::{Result, TaskdagError};
use crate::graph::{Graph, Label};
use crate::kind::{load_kinds, Kind};
use crate::morph::{morph, MorphContext};
use crate::optimize::{optimize_task_graph, OptimizationRecord, OptimizeInputs};
use crate::parameters::{load_parameters, Parameters};
use crate::platform::PlatformClient;
use crate::registry::Registries;
use crate::task::Task;
use crate::taskgraph::TaskGraph;
use crate::transforms::{TransformConfig, TransformSequence};
use crate::verify::Verifications;
use crate::vcs::Vcs;

/// How the generator obtains its parameters.
pub enum ParametersInput {
    /// An already-built bundle.
    Ready(Parameters),
    /// A specification string resolved once the graph config (and with it
    /// the trust domain and registered extensions) is known.
    Spec {
        spec: Option<String>,
        strict: bool,
        overrides: BTreeMap<String, Value>,
    },
}

/// Knobs that don't change per phase.
pub struct GeneratorSettings {
    pub decision_task_id: String,
    pub write_artifacts: bool,
    pub enable_verifications: bool,
    /// Skip schema checkpoints for quick local iteration.
    pub fast: bool,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            decision_task_id: "DECISION-TASK".to_string(),
            write_artifacts: false,
            enable_verifications: true,
            fast: false,
        }
    }
}

/// Hook through which a project registers its extensions before the
/// registries freeze.
pub type RegisterHook = fn(&mut Registries) -> Result<()>;

pub struct TaskGraphGenerator {
    graph_config: GraphConfig,
    registries: Registries,
    client: Arc<dyn PlatformClient>,
    vcs: Arc<dyn Vcs>,
    settings: GeneratorSettings,
    verifications: Verifications,

    parameters_input: Option<ParametersInput>,
    parameters: Option<Parameters>,
    kinds: Option<BTreeMap<String, Kind>>,
    kind_order: Option<Vec<String>>,
    full_task_set: Option<TaskGraph>,
    full_task_graph: Option<TaskGraph>,
    target_task_set: Option<TaskGraph>,
    target_task_graph: Option<TaskGraph>,
    optimized_task_graph: Option<TaskGraph>,
    label_to_taskid: Option<BTreeMap<Label, String>>,
    optimization_log: Option<Vec<OptimizationRecord>>,
    morphed_task_graph: Option<TaskGraph>,
}

impl TaskGraphGenerator {
    /// Load the graph configuration, build the registries (built-ins plus
    /// the project hook), and freeze both.
    pub fn new(
        root_dir: impl Into<PathBuf>,
        parameters: ParametersInput,
        client: Arc<dyn PlatformClient>,
        vcs: Arc<dyn Vcs>,
        settings: GeneratorSettings,
        register: Option<RegisterHook>,
    ) -> Result<TaskGraphGenerator> {
        let root_dir = root_dir.into();
        info!(root = %root_dir.display(), "loading graph configuration");
        let graph_config = load_graph_config(&root_dir)?;

        let mut registries = Registries::with_builtins();
        if let Some(register) = register {
            register(&mut registries)?;
        }

        let verifications = Verifications::new(settings.enable_verifications);

        Ok(TaskGraphGenerator {
            graph_config,
            registries,
            client,
            vcs,
            settings,
            verifications,
            parameters_input: Some(parameters),
            parameters: None,
            kinds: None,
            kind_order: None,
            full_task_set: None,
            full_task_graph: None,
            target_task_set: None,
            target_task_graph: None,
            optimized_task_graph: None,
            label_to_taskid: None,
            optimization_log: None,
            morphed_task_graph: None,
        })
    }

    pub fn graph_config(&self) -> &GraphConfig {
        &self.graph_config
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    // ---- phase: parameters -------------------------------------------------

    pub fn parameters(&mut self) -> Result<&Parameters> {
        if self.parameters.is_none() {
            let input = self
                .parameters_input
                .take()
                .expect("parameters input consumed exactly once");
            let parameters = match input {
                ParametersInput::Ready(parameters) => parameters,
                ParametersInput::Spec {
                    spec,
                    strict,
                    overrides,
                } => load_parameters(
                    spec.as_deref(),
                    strict,
                    &overrides,
                    self.registries.parameter_extensions(),
                    Some(self.graph_config.trust_domain()),
                    self.client.as_ref(),
                    self.vcs.as_ref(),
                )?,
            };
            info!(%parameters, "using parameters");
            self.parameters = Some(parameters);
        }
        Ok(self.parameters.as_ref().expect("just set"))
    }

    // ---- phase 0: kinds ----------------------------------------------------

    fn ensure_kinds(&mut self) -> Result<()> {
        if self.kinds.is_some() {
            return Ok(());
        }
        self.parameters()?;

        let target_kinds = self.target_kinds()?;
        let kinds_dir = self.graph_config.kinds_dir();

        let kinds: BTreeMap<String, Kind> = if target_kinds.is_empty() {
            load_kinds(&kinds_dir)?
                .into_iter()
                .map(|k| (k.name.clone(), k))
                .collect()
        } else {
            // Only the named kinds and their transitive kind-dependencies.
            info!(kinds = ?target_kinds, "limiting to target kinds");
            let mut queue: Vec<String> = target_kinds;
            let mut loaded: BTreeMap<String, Kind> = BTreeMap::new();
            while let Some(name) = queue.pop() {
                if loaded.contains_key(&name) {
                    continue;
                }
                let kind = Kind::load(&kinds_dir, &name)?.ok_or_else(|| {
                    TaskdagError::Config(format!("target kind '{name}' does not exist"))
                })?;
                queue.extend(kind.kind_dependencies());
                loaded.insert(name, kind);
            }
            loaded
        };

        // The kinds form their own DAG by name; they load in topological
        // order, dependencies first.
        //
        // Edge direction: dep -> kind, so a topological sort yields each
        // kind after everything it depends on. A failed sort is a cycle.
        let mut kind_graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in kinds.keys() {
            kind_graph.add_node(name.as_str());
        }
        for kind in kinds.values() {
            for dep in kind.kind_dependencies() {
                if !kinds.contains_key(&dep) {
                    return Err(TaskdagError::Dependency(format!(
                        "kind '{}' depends on unknown kind '{dep}'",
                        kind.name
                    )));
                }
                let dep = kinds
                    .get_key_value(&dep)
                    .map(|(k, _)| k.as_str())
                    .expect("checked above");
                kind_graph.add_edge(dep, kind.name.as_str(), ());
            }
        }
        let kind_order: Vec<String> = match toposort(&kind_graph, None) {
            Ok(order) => order.into_iter().map(str::to_string).collect(),
            Err(cycle) => {
                return Err(TaskdagError::Dependency(format!(
                    "cycle detected in kind dependencies involving kind '{}'",
                    cycle.node_id()
                )))
            }
        };

        self.kinds = Some(kinds);
        self.kind_order = Some(kind_order);
        Ok(())
    }

    fn target_kinds(&mut self) -> Result<Vec<String>> {
        Ok(self
            .parameters()?
            .get("target-kinds")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    // ---- phase 1: full task set / graph ------------------------------------

    pub fn full_task_set(&mut self) -> Result<&TaskGraph> {
        if self.full_task_set.is_none() {
            self.ensure_kinds()?;
            info!("generating full task set");

            let kinds = self.kinds.as_ref().expect("ensured");
            let kind_order = self.kind_order.as_ref().expect("ensured");
            let params = self.parameters.as_ref().expect("ensured");

            let mut all_tasks: BTreeMap<Label, Task> = BTreeMap::new();
            for kind_name in kind_order {
                let kind = &kinds[kind_name];
                let new_tasks = load_tasks_for_kind(
                    kind,
                    params,
                    &self.graph_config,
                    &self.registries,
                    &all_tasks,
                    &self.settings,
                )?;
                for task in new_tasks {
                    if all_tasks.contains_key(&task.label) {
                        return Err(TaskdagError::Loader {
                            kind: kind.name.clone(),
                            message: format!("duplicate tasks with label '{}'", task.label),
                        });
                    }
                    all_tasks.insert(task.label.clone(), task);
                }
            }

            let graph = Graph::new(all_tasks.keys().cloned(), []);
            let task_set = TaskGraph::new(all_tasks, graph);
            self.verify("full_task_set", &task_set)?;
            self.full_task_set = Some(task_set);
        }
        Ok(self.full_task_set.as_ref().expect("just set"))
    }

    pub fn full_task_graph(&mut self) -> Result<&TaskGraph> {
        if self.full_task_graph.is_none() {
            self.full_task_set()?;
            info!("generating full task graph");
            let task_set = self.full_task_set.as_ref().expect("ensured");

            let mut edges = BTreeSet::new();
            for task in task_set.tasks.values() {
                for (edge_name, dep) in &task.dependencies {
                    if edge_name == crate::transforms::task::DOCKER_IMAGE_EDGE {
                        return Err(TaskdagError::Dependency(format!(
                            "task '{}' uses the reserved '{edge_name}' dependency edge",
                            task.label
                        )));
                    }
                    if !task_set.tasks.contains_key(dep) {
                        return Err(TaskdagError::Dependency(format!(
                            "task '{}' lists a dependency that does not exist: '{dep}'",
                            task.label
                        )));
                    }
                    edges.insert((task.label.clone(), dep.clone(), edge_name.clone()));
                }
                for soft in &task.soft_dependencies {
                    if !task_set.tasks.contains_key(soft) {
                        return Err(TaskdagError::Dependency(format!(
                            "task '{}' lists a soft dependency that does not exist: '{soft}'",
                            task.label
                        )));
                    }
                }
                for if_dep in &task.if_dependencies {
                    if !task_set.tasks.contains_key(if_dep) {
                        return Err(TaskdagError::Dependency(format!(
                            "task '{}' lists an if-dependency that does not exist: '{if_dep}'",
                            task.label
                        )));
                    }
                }
            }

            let graph = Graph::new(task_set.tasks.keys().cloned(), edges);
            // Cycle detection is mandatory before anything walks the graph.
            graph.visit_postorder()?;
            info!(
                tasks = task_set.tasks.len(),
                dependencies = graph.edges().len(),
                "full task graph assembled"
            );

            let full = TaskGraph::new(task_set.tasks.clone(), graph);
            self.verify("full_task_graph", &full)?;
            self.full_task_graph = Some(full);
        }
        Ok(self.full_task_graph.as_ref().expect("just set"))
    }

    // ---- phase 2: target task set ------------------------------------------

    pub fn target_task_set(&mut self) -> Result<&TaskGraph> {
        if self.target_task_set.is_none() {
            self.full_task_graph()?;
            info!("generating target task set");

            let full = self.full_task_graph.as_ref().expect("ensured");
            let params = self.parameters.as_ref().expect("ensured");

            let mut filters = params.str_list("filters").unwrap_or_default();
            if filters.is_empty() {
                filters.push("target_tasks_method".to_string());
            }

            let mut selected: BTreeMap<Label, Task> = full.tasks.clone();
            for filter_name in &filters {
                let filter = self.registries.filter(filter_name)?;
                let subset = TaskGraph::new(
                    selected.clone(),
                    Graph::new(selected.keys().cloned(), []),
                );
                let keep: BTreeSet<Label> = filter(
                    &subset,
                    params,
                    &self.graph_config,
                    &self.registries,
                )?
                .into_iter()
                .collect();
                let before = selected.len();
                selected.retain(|label, _| keep.contains(label));
                info!(
                    filter = %filter_name,
                    pruned = before - selected.len(),
                    remaining = selected.len(),
                    "applied target filter"
                );
            }

            let graph = Graph::new(selected.keys().cloned(), []);
            let target_set = TaskGraph::new(selected, graph);
            self.verify("target_task_set", &target_set)?;
            self.target_task_set = Some(target_set);
        }
        Ok(self.target_task_set.as_ref().expect("just set"))
    }

    // ---- phase 3: target task graph ----------------------------------------

    pub fn target_task_graph(&mut self) -> Result<&TaskGraph> {
        if self.target_task_graph.is_none() {
            self.target_task_set()?;
            info!("generating target task graph");
            let always_target = self.always_target_tasks()?;

            let full = self.full_task_graph.as_ref().expect("ensured");
            let target_set = self.target_task_set.as_ref().expect("ensured");
            let new_riders = always_target
                .iter()
                .filter(|l| !target_set.tasks.contains_key(*l))
                .count();
            info!(count = new_riders, "adding always-target tasks");

            let mut requested: BTreeSet<Label> = target_set.tasks.keys().cloned().collect();
            requested.extend(always_target);

            let closed = full.graph.transitive_closure(&requested, false)?;
            let tasks: BTreeMap<Label, Task> = closed
                .nodes()
                .iter()
                .map(|l| (l.clone(), full.tasks[l].clone()))
                .collect();

            let target_graph = TaskGraph::new(tasks, closed);
            self.verify("target_task_graph", &target_graph)?;
            self.target_task_graph = Some(target_graph);
        }
        Ok(self.target_task_graph.as_ref().expect("just set"))
    }

    /// Labels of tasks riding along regardless of target selection, per
    /// `enable_always_target` (either a blanket boolean or a list of
    /// kinds).
    fn always_target_tasks(&mut self) -> Result<BTreeSet<Label>> {
        self.full_task_graph()?;
        let full = self.full_task_graph.as_ref().expect("ensured");
        let params = self.parameters.as_ref().expect("ensured");

        let enable = params
            .get("enable_always_target")
            .cloned()
            .unwrap_or(Value::Bool(false));

        let allowed_kind = |kind: &str| match &enable {
            Value::Bool(enabled) => *enabled,
            Value::Array(kinds) => kinds.iter().any(|k| k.as_str() == Some(kind)),
            _ => false,
        };

        Ok(full
            .tasks
            .values()
            .filter(|t| {
                t.attributes
                    .get("always_target")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
                    && allowed_kind(&t.kind)
            })
            .map(|t| t.label.clone())
            .collect())
    }

    // ---- phase 4: optimized task graph -------------------------------------

    pub fn optimized_task_graph(&mut self) -> Result<&TaskGraph> {
        if self.optimized_task_graph.is_none() {
            self.target_task_graph()?;
            info!("generating optimized task graph");

            let target_graph = self.target_task_graph.as_ref().expect("ensured");
            let target_set = self.target_task_set.as_ref().expect("ensured");
            let params = self.parameters.as_ref().expect("ensured");

            let mut do_not_optimize: BTreeSet<Label> = params
                .str_list("do_not_optimize")
                .unwrap_or_default()
                .into_iter()
                .collect();
            if !params.bool("optimize_target_tasks").unwrap_or(true) {
                // Target tasks are pinned, but always-target riders (which
                // are not part of the target set) stay optimizable.
                do_not_optimize.extend(target_set.tasks.keys().cloned());
            }

            if let Some(Value::String(strategies)) = params.get("optimize_strategies") {
                tracing::warn!(
                    %strategies,
                    "optimize_strategies is set; strategy overrides must be \
                     registered through the registration hook"
                );
            }

            let existing_tasks: BTreeMap<Label, String> = params
                .get("existing_tasks")
                .and_then(|v| v.as_object())
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| {
                            v.as_str().map(|v| (k.clone(), v.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();

            let inputs = OptimizeInputs {
                params,
                do_not_optimize: &do_not_optimize,
                existing_tasks: &existing_tasks,
                strategies: self.registries.strategies(),
                client: self.client.as_ref(),
                decision_task_id: &self.settings.decision_task_id,
            };

            let (optimized, label_to_taskid, log) =
                optimize_task_graph(target_graph, &inputs)?;

            self.verify("optimized_task_graph", &optimized)?;
            self.optimized_task_graph = Some(optimized);
            self.label_to_taskid = Some(label_to_taskid);
            self.optimization_log = Some(log);
        }
        Ok(self.optimized_task_graph.as_ref().expect("just set"))
    }

    /// The label→taskid assignment backing the optimized graph.
    pub fn label_to_taskid(&mut self) -> Result<&BTreeMap<Label, String>> {
        self.optimized_task_graph()?;
        Ok(self.label_to_taskid.as_ref().expect("ensured"))
    }

    /// Structured record of every keep/remove/replace decision.
    pub fn optimization_log(&mut self) -> Result<&[OptimizationRecord]> {
        self.optimized_task_graph()?;
        Ok(self.optimization_log.as_ref().expect("ensured"))
    }

    // ---- phase 5: morphed task graph ---------------------------------------

    pub fn morphed_task_graph(&mut self) -> Result<&TaskGraph> {
        if self.morphed_task_graph.is_none() {
            self.optimized_task_graph()?;
            info!("generating morphed task graph");

            let optimized = self.optimized_task_graph.as_ref().expect("ensured").clone();
            let label_to_taskid = self.label_to_taskid.as_ref().expect("ensured").clone();
            let params = self.parameters.as_ref().expect("ensured");

            let ctx = MorphContext {
                params,
                graph_config: &self.graph_config,
                registries: &self.registries,
                decision_task_id: &self.settings.decision_task_id,
            };
            let (morphed, label_to_taskid) = morph(optimized, label_to_taskid, &ctx)?;

            self.verify("morphed_task_graph", &morphed)?;
            self.morphed_task_graph = Some(morphed);
            self.label_to_taskid = Some(label_to_taskid);
        }
        Ok(self.morphed_task_graph.as_ref().expect("just set"))
    }

    fn verify(&self, phase: &str, graph: &TaskGraph) -> Result<()> {
        let params = self.parameters.as_ref().expect("parameters precede phases");
        self.verifications
            .verify(phase, graph, &self.graph_config, params)
    }
}

/// Run one kind's loader and transform pipeline, producing frozen tasks.
fn load_tasks_for_kind(
    kind: &Kind,
    params: &Parameters,
    graph_config: &GraphConfig,
    registries: &Registries,
    all_tasks: &BTreeMap<Label, Task>,
    settings: &GeneratorSettings,
) -> Result<Vec<Task>> {
    debug!(kind = %kind.name, "loading tasks");

    let kind_dependencies = kind.kind_dependencies();
    let dependency_tasks: BTreeMap<Label, Task> = all_tasks
        .iter()
        .filter(|(_, t)| kind_dependencies.contains(&t.kind))
        .map(|(l, t)| (l.clone(), t.clone()))
        .collect();

    let config = TransformConfig {
        kind: kind.name.clone(),
        path: kind.path.clone(),
        config: kind.config.clone(),
        params,
        graph_config,
        kind_dependencies_tasks: &dependency_tasks,
        registries,
        write_artifacts: settings.write_artifacts,
        fast: settings.fast,
    };

    let loader = registries.loader(kind.loader_reference())?;
    let loaded = loader(kind, &config)?;

    let mut pipeline = TransformSequence::new();
    for reference in &loaded.transform_references {
        pipeline.extend(registries.transforms(reference)?);
    }

    let stubs = pipeline.apply(&config, loaded.stubs)?;
    let tasks: Vec<Task> = stubs
        .into_iter()
        .map(|stub| Task::from_task_dict(&kind.name, stub))
        .collect::<Result<_>>()?;

    info!(kind = %kind.name, count = tasks.len(), "generated tasks");
    Ok(tasks)
}
