// src/platform.rs

//! Abstract operations against the task-execution platform.
//!
//! The core never talks HTTP itself; it consumes this trait and treats the
//! implementation as the sole arbiter of truth. Statuses are never cached
//! across phases within a generation. Implementations own credentials,
//! transport, retries (exponential backoff with bounded attempts and a
//! per-request deadline) and the platform's page-size limit: the batched
//! calls accept arbitrary-length input and must page internally.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, TaskdagError};

/// Status of an already-created task, as returned by the batched status
/// query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// `pending`, `running`, `completed`, `failed` or `exception`.
    pub state: String,
    /// Expiration timestamp in platform JSON time.
    pub expires: String,
}

pub trait PlatformClient {
    /// Resolve an index path to the task id it points at, or `None` when
    /// nothing is indexed there.
    fn find_task_by_index(&self, index_path: &str) -> Result<Option<String>>;

    /// Fetch statuses for a batch of task ids. Unknown ids are simply
    /// absent from the result; the input may be arbitrarily long.
    fn get_task_statuses(&self, task_ids: &[String]) -> Result<BTreeMap<String, TaskStatus>>;

    /// Fetch a named artifact of a task.
    fn get_artifact(&self, task_id: &str, name: &str) -> Result<Vec<u8>>;

    /// Create every task in the mapping as one atomic batch, parented to
    /// the decision task. Fails whole on any error.
    fn create_tasks(
        &self,
        tasks: &BTreeMap<String, serde_json::Value>,
        decision_task_id: &str,
    ) -> Result<()>;
}

/// Resolve many index paths through [`PlatformClient::find_task_by_index`],
/// returning only the hits. The per-path lookups tolerate "not found"; any
/// other platform failure propagates.
pub fn find_task_ids_batched(
    client: &dyn PlatformClient,
    index_paths: impl IntoIterator<Item = String>,
) -> Result<BTreeMap<String, String>> {
    let mut found = BTreeMap::new();
    for path in index_paths {
        if let Some(task_id) = client.find_task_by_index(&path)? {
            found.insert(path, task_id);
        }
    }
    debug!(hits = found.len(), "resolved index paths");
    Ok(found)
}

/// An in-memory client, used by the test suite and by the CLI when no real
/// platform is configured. Lookups hit the maps given at construction;
/// created tasks are recorded for inspection.
#[derive(Debug, Default)]
pub struct StaticPlatformClient {
    index: BTreeMap<String, String>,
    statuses: BTreeMap<String, TaskStatus>,
    artifacts: BTreeMap<(String, String), Vec<u8>>,
    created: Mutex<Vec<(String, serde_json::Value)>>,
}

impl StaticPlatformClient {
    pub fn new(
        index: BTreeMap<String, String>,
        statuses: BTreeMap<String, TaskStatus>,
    ) -> Self {
        Self {
            index,
            statuses,
            artifacts: BTreeMap::new(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn with_artifact(mut self, task_id: &str, name: &str, contents: &[u8]) -> Self {
        self.artifacts
            .insert((task_id.to_string(), name.to_string()), contents.to_vec());
        self
    }

    /// Tasks recorded by `create_tasks`, in submission order.
    pub fn created_tasks(&self) -> Vec<(String, serde_json::Value)> {
        self.created.lock().expect("created list poisoned").clone()
    }
}

impl PlatformClient for StaticPlatformClient {
    fn find_task_by_index(&self, index_path: &str) -> Result<Option<String>> {
        Ok(self.index.get(index_path).cloned())
    }

    fn get_task_statuses(&self, task_ids: &[String]) -> Result<BTreeMap<String, TaskStatus>> {
        Ok(task_ids
            .iter()
            .filter_map(|id| self.statuses.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    fn get_artifact(&self, task_id: &str, name: &str) -> Result<Vec<u8>> {
        self.artifacts
            .get(&(task_id.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                TaskdagError::Platform(format!("no artifact '{name}' on task {task_id}"))
            })
    }

    fn create_tasks(
        &self,
        tasks: &BTreeMap<String, serde_json::Value>,
        _decision_task_id: &str,
    ) -> Result<()> {
        let mut created = self.created.lock().expect("created list poisoned");
        for (task_id, definition) in tasks {
            created.push((task_id.clone(), definition.clone()));
        }
        Ok(())
    }
}
