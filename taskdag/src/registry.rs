// src/registry.rs

//! Write-once registries of named strategies, loaders, transforms, morphs
//! and selection functions.
//!
//! The original design of this engine relied on import-time side effects to
//! populate process-wide tables. Here registration is explicit instead: a
//! `Registries` value is created with every built-in present, handed to the
//! project's registration hook exactly once, then frozen and shared
//! read-only by the generator and every transform config. Registering a
//! duplicate name is fatal.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::GraphConfig;
use crate::errors::{Result, TaskdagError};
use crate::graph::Label;
use crate::morph::{ExpressionEvaluator, MorphFn};
use crate::optimize::OptimizationStrategy;
use crate::parameters::{Parameters, ParametersExtension};
use crate::task::Task;
use crate::taskgraph::TaskGraph;
use crate::transforms::{TaskStub, TransformConfig, TransformSequence};

/// Produces raw task stubs for a kind; see the `loader` module.
pub type LoaderFn =
    fn(&crate::kind::Kind, &TransformConfig) -> Result<crate::loader::LoadedKind>;

/// Selects the target tasks out of the full task graph.
pub type TargetMethodFn = fn(&TaskGraph, &Parameters, &GraphConfig) -> Result<Vec<Label>>;

/// Narrows an already-selected task set further; chained via the `filters`
/// parameter. Filters receive the registries so they can dispatch to other
/// named selection functions.
pub type FilterFn =
    fn(&TaskGraph, &Parameters, &GraphConfig, &Registries) -> Result<Vec<Label>>;

/// Groups kind-dependency tasks for the `from-deps` transform.
pub type GroupByFn = fn(&TransformConfig, Vec<&Task>, Option<&Value>) -> Result<Vec<Vec<Task>>>;

/// Translates a `run:` stanza into a concrete worker command.
pub type RunUsingFn = fn(&TransformConfig, &mut TaskStub, &Value) -> Result<()>;

/// The frozen view handed to the generator.
#[derive(Default)]
pub struct Registries {
    loaders: BTreeMap<String, LoaderFn>,
    transforms: BTreeMap<String, TransformSequence>,
    strategies: BTreeMap<String, Arc<dyn OptimizationStrategy>>,
    target_methods: BTreeMap<String, TargetMethodFn>,
    filters: BTreeMap<String, FilterFn>,
    group_by: BTreeMap<String, GroupByFn>,
    run_using: BTreeMap<String, RunUsingFn>,
    morphs: Vec<(String, MorphFn)>,
    parameter_extensions: Vec<ParametersExtension>,
    expression_evaluator: Option<Arc<dyn ExpressionEvaluator>>,
}

impl Registries {
    /// A registry with every built-in registered.
    pub fn with_builtins() -> Self {
        let mut registries = Registries::default();
        register_builtins(&mut registries).expect("built-in registrations cannot collide");
        registries
    }

    pub fn register_loader(&mut self, reference: &str, loader: LoaderFn) -> Result<()> {
        insert_unique(&mut self.loaders, reference, loader, "loader")
    }

    pub fn loader(&self, reference: &str) -> Result<LoaderFn> {
        self.loaders.get(reference).copied().ok_or_else(|| {
            TaskdagError::Config(format!("unknown loader reference '{reference}'"))
        })
    }

    /// Register a transform module under its textual reference, e.g.
    /// `taskdag.transforms.chunking:transforms`.
    pub fn register_transforms(
        &mut self,
        reference: &str,
        sequence: TransformSequence,
    ) -> Result<()> {
        insert_unique(&mut self.transforms, reference, sequence, "transform")
    }

    pub fn transforms(&self, reference: &str) -> Result<&TransformSequence> {
        self.transforms.get(reference).ok_or_else(|| {
            TaskdagError::Config(format!("unknown transform reference '{reference}'"))
        })
    }

    pub fn register_strategy(
        &mut self,
        name: &str,
        strategy: Arc<dyn OptimizationStrategy>,
    ) -> Result<()> {
        insert_unique(&mut self.strategies, name, strategy, "optimization strategy")
    }

    pub fn strategy(&self, name: &str) -> Result<&Arc<dyn OptimizationStrategy>> {
        self.strategies.get(name).ok_or_else(|| {
            TaskdagError::Config(format!("unknown optimization strategy '{name}'"))
        })
    }

    pub fn strategies(&self) -> &BTreeMap<String, Arc<dyn OptimizationStrategy>> {
        &self.strategies
    }

    pub fn register_target_method(&mut self, name: &str, method: TargetMethodFn) -> Result<()> {
        insert_unique(&mut self.target_methods, name, method, "target-tasks method")
    }

    pub fn target_method(&self, name: &str) -> Result<TargetMethodFn> {
        self.target_methods.get(name).copied().ok_or_else(|| {
            TaskdagError::Config(format!("unknown target-tasks method '{name}'"))
        })
    }

    pub fn register_filter(&mut self, name: &str, filter: FilterFn) -> Result<()> {
        insert_unique(&mut self.filters, name, filter, "filter")
    }

    pub fn filter(&self, name: &str) -> Result<FilterFn> {
        self.filters
            .get(name)
            .copied()
            .ok_or_else(|| TaskdagError::Config(format!("unknown filter '{name}'")))
    }

    pub fn register_group_by(&mut self, name: &str, group_by: GroupByFn) -> Result<()> {
        insert_unique(&mut self.group_by, name, group_by, "group-by function")
    }

    pub fn group_by(&self, name: &str) -> Result<GroupByFn> {
        self.group_by
            .get(name)
            .copied()
            .ok_or_else(|| TaskdagError::Config(format!("unknown group-by function '{name}'")))
    }

    pub fn register_run_using(&mut self, name: &str, run_using: RunUsingFn) -> Result<()> {
        insert_unique(&mut self.run_using, name, run_using, "run-using implementation")
    }

    pub fn run_using(&self, name: &str) -> Result<RunUsingFn> {
        self.run_using.get(name).copied().ok_or_else(|| {
            TaskdagError::Config(format!("unknown run-using implementation '{name}'"))
        })
    }

    /// Morphs run in registration order; order is meaningful and preserved.
    pub fn register_morph(&mut self, name: &str, morph: MorphFn) -> Result<()> {
        if self.morphs.iter().any(|(n, _)| n == name) {
            return Err(duplicate(name, "morph"));
        }
        self.morphs.push((name.to_string(), morph));
        Ok(())
    }

    pub fn morphs(&self) -> &[(String, MorphFn)] {
        &self.morphs
    }

    pub fn register_parameters_extension(&mut self, extension: ParametersExtension) {
        self.parameter_extensions.push(extension);
    }

    pub fn parameter_extensions(&self) -> &[ParametersExtension] {
        &self.parameter_extensions
    }

    pub fn set_expression_evaluator(&mut self, evaluator: Arc<dyn ExpressionEvaluator>) {
        self.expression_evaluator = Some(evaluator);
    }

    pub fn expression_evaluator(&self) -> Option<&Arc<dyn ExpressionEvaluator>> {
        self.expression_evaluator.as_ref()
    }
}

fn register_builtins(registries: &mut Registries) -> Result<()> {
    crate::loader::register_builtins(registries)?;
    crate::transforms::task_context::register(registries)?;
    crate::transforms::matrix::register(registries)?;
    crate::transforms::chunking::register(registries)?;
    crate::transforms::from_deps::register(registries)?;
    crate::transforms::notify::register(registries)?;
    crate::transforms::cached_tasks::register(registries)?;
    crate::transforms::run::register(registries)?;
    crate::transforms::task::register(registries)?;
    crate::optimize::strategies::register_builtins(registries)?;
    crate::target_tasks::register_builtins(registries)?;
    crate::morph::register_builtins(registries)?;
    Ok(())
}

fn insert_unique<V>(
    map: &mut BTreeMap<String, V>,
    name: &str,
    value: V,
    what: &str,
) -> Result<()> {
    if map.contains_key(name) {
        return Err(duplicate(name, what));
    }
    map.insert(name.to_string(), value);
    Ok(())
}

fn duplicate(name: &str, what: &str) -> TaskdagError {
    TaskdagError::Config(format!("{what} '{name}' is already registered"))
}
