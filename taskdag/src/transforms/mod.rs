// src/transforms/mod.rs

//! The transform engine: composable pipelines from raw task stubs to
//! concrete tasks.
//!
//! A [`TransformSequence`] is an ordered list of steps, each either a plain
//! function `(config, tasks) -> tasks` or a schema checkpoint that every
//! task must pass before flowing on. Transforms may drop, mutate or fan out
//! tasks; they must confine their effects to the stubs they return.

pub mod cached_tasks;
pub mod chunking;
pub mod from_deps;
pub mod matrix;
pub mod notify;
pub mod run;
pub mod task;
pub mod task_context;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::config::GraphConfig;
use crate::errors::{Result, TaskdagError};
use crate::graph::Label;
use crate::parameters::Parameters;
use crate::registry::Registries;
use crate::task::Task;
use crate::util::schema::Schema;

/// A raw task description flowing through a kind's pipeline: a plain
/// mapping until the final transform shapes it into a [`Task`].
pub type TaskStub = serde_json::Map<String, Value>;

/// Everything a transform may consult about its surroundings.
pub struct TransformConfig<'a> {
    /// Name of the kind being transformed.
    pub kind: String,
    /// The kind's configuration directory.
    pub path: PathBuf,
    /// The kind's raw configuration (`kind.yml` contents).
    pub config: Value,
    pub params: &'a Parameters,
    pub graph_config: &'a GraphConfig,
    /// Tasks of this kind's `kind-dependencies`, by label.
    pub kind_dependencies_tasks: &'a BTreeMap<Label, Task>,
    pub registries: &'a Registries,
    /// Whether debug artifacts should be written alongside generation.
    pub write_artifacts: bool,
    /// Fast mode: schema checkpoints are skipped.
    pub fast: bool,
}

type TransformFn = dyn Fn(&TransformConfig, Vec<TaskStub>) -> Result<Vec<TaskStub>> + Send + Sync;

#[derive(Clone)]
enum Step {
    Validate(Arc<Schema>),
    Apply(Arc<TransformFn>),
}

/// An ordered, composable pipeline of transforms.
#[derive(Clone, Default)]
pub struct TransformSequence {
    steps: Vec<Step>,
}

impl TransformSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transform function.
    pub fn add<F>(&mut self, func: F)
    where
        F: Fn(&TransformConfig, Vec<TaskStub>) -> Result<Vec<TaskStub>> + Send + Sync + 'static,
    {
        self.steps.push(Step::Apply(Arc::new(func)));
    }

    /// Install a schema checkpoint: every task reaching this point must
    /// validate, else the pipeline fails fast.
    pub fn add_validate(&mut self, schema: Schema) {
        self.steps.push(Step::Validate(Arc::new(schema)));
    }

    /// Append all of another sequence's steps.
    pub fn extend(&mut self, other: &TransformSequence) {
        self.steps.extend(other.steps.iter().cloned());
    }

    /// Run the pipeline over a batch of task stubs.
    pub fn apply(&self, config: &TransformConfig, mut tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
        for step in &self.steps {
            match step {
                Step::Validate(schema) => {
                    if config.fast {
                        continue;
                    }
                    for task in &tasks {
                        let descriptor = stub_descriptor(&config.kind, task);
                        schema.validate(&Value::Object(task.clone()), &descriptor)?;
                    }
                }
                Step::Apply(func) => {
                    tasks = func(config, tasks).map_err(|e| wrap(&config.kind, e))?;
                }
            }
        }
        Ok(tasks)
    }
}

fn stub_descriptor(kind: &str, stub: &TaskStub) -> String {
    let name = stub
        .get("name")
        .or_else(|| stub.get("label"))
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    format!("task '{name}' of kind '{kind}'")
}

/// Wrap a transform failure with kind context, unless it already carries
/// some.
fn wrap(kind: &str, err: TaskdagError) -> TaskdagError {
    match err {
        e @ (TaskdagError::Transform { .. } | TaskdagError::Schema { .. }) => e,
        other => TaskdagError::Transform {
            kind: kind.to_string(),
            label: None,
            message: other.to_string(),
        },
    }
}

/// Helper for transforms: a `Transform` error carrying this kind's context.
pub fn transform_error(config: &TransformConfig, stub: &TaskStub, message: String) -> TaskdagError {
    TaskdagError::Transform {
        kind: config.kind.clone(),
        label: stub
            .get("name")
            .or_else(|| stub.get("label"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        message,
    }
}

/// Fetch the name-or-label of a stub for error reporting and labeling.
pub fn stub_name(stub: &TaskStub) -> Option<&str> {
    stub.get("name")
        .or_else(|| stub.get("label"))
        .and_then(|v| v.as_str())
}
