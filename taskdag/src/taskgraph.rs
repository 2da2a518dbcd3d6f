// src/taskgraph.rs

//! A set of tasks plus the graph over their labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::graph::{Graph, Label};
use crate::task::Task;

/// The pairing every generation phase produces: a label-keyed task map and
/// the dependency graph over those labels. The graph's node set always
/// equals the task map's key set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: BTreeMap<Label, Task>,
    pub graph: Graph,
}

impl TaskGraph {
    pub fn new(tasks: BTreeMap<Label, Task>, graph: Graph) -> Self {
        debug_assert!(
            tasks.keys().all(|l| graph.contains(l)) && graph.nodes().len() == tasks.len(),
            "task map and graph nodes out of sync"
        );
        Self { tasks, graph }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Task> {
        self.tasks.get(label)
    }

    /// The phase artifact: full task records keyed by label, with
    /// deterministic (sorted) key order.
    pub fn to_json(&self) -> Result<Value> {
        let mut out = serde_json::Map::new();
        for (label, task) in &self.tasks {
            out.insert(label.clone(), serde_json::to_value(task)?);
        }
        Ok(Value::Object(out))
    }

    /// Rebuild a task graph from its [`TaskGraph::to_json`] artifact.
    pub fn from_json(value: &Value) -> Result<TaskGraph> {
        let tasks: BTreeMap<Label, Task> = serde_json::from_value(value.clone())?;
        let mut edges = Vec::new();
        for (label, task) in &tasks {
            for (edge, dep) in &task.dependencies {
                edges.push((label.clone(), dep.clone(), edge.clone()));
            }
        }
        let graph = Graph::new(tasks.keys().cloned(), edges);
        Ok(TaskGraph { tasks, graph })
    }
}
