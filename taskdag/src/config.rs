// src/config.rs

//! Repository-level graph configuration (`config.yml`).

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, TaskdagError};
use crate::util::schema::{
    self, any_of, map, map_of, open_map, optional, optionally_keyed_by, required, seq, Schema,
    TASK_PRIORITIES,
};
use crate::util::templates::resolve_dotted_path;
use crate::util::yaml::load_yaml;

/// Default per-task limits imposed by the execution platform; both can be
/// overridden under `taskgraph:` in `config.yml`.
pub const DEFAULT_MAX_DEPENDENCIES: u64 = 9_999;
pub const DEFAULT_MAX_ROUTES: u64 = 64;

/// The parsed, validated `config.yml`. Immutable for the life of a
/// generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    config: Value,
    root_dir: PathBuf,
}

impl GraphConfig {
    /// Wrap an already-parsed configuration value, validating it first.
    pub fn new(config: Value, root_dir: PathBuf) -> Result<GraphConfig> {
        graph_config_schema().validate(&config, "graph configuration")?;
        Ok(GraphConfig { config, root_dir })
    }

    /// Look up a dotted path, e.g. `taskgraph.cached-task-prefix`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        resolve_dotted_path(&self.config, key)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Directory holding the per-kind configuration subdirectories.
    pub fn kinds_dir(&self) -> PathBuf {
        self.root_dir.join("kinds")
    }

    pub fn trust_domain(&self) -> &str {
        self.get("trust-domain")
            .and_then(|v| v.as_str())
            .expect("validated: trust-domain is a required string")
    }

    /// The (possibly keyed-by) default task priority value.
    pub fn task_priority(&self) -> &Value {
        self.get("task-priority")
            .expect("validated: task-priority is required")
    }

    /// The worker alias table under `workers.aliases`.
    pub fn worker_alias(&self, alias: &str) -> Result<&Value> {
        self.get(&format!("workers.aliases.{alias}")).ok_or_else(|| {
            TaskdagError::Config(format!("unknown worker alias '{alias}'"))
        })
    }

    /// Index prefix for cached tasks; defaults to the trust domain.
    pub fn cached_task_prefix(&self) -> &str {
        self.get("taskgraph.cached-task-prefix")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| self.trust_domain())
    }

    pub fn index_path_regexes(&self) -> Vec<String> {
        self.get("taskgraph.index-path-regexes")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn max_dependencies(&self) -> u64 {
        self.get("taskgraph.max-dependencies")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_DEPENDENCIES)
    }

    pub fn max_routes(&self) -> u64 {
        self.get("taskgraph.max-routes")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_ROUTES)
    }

    /// The repository table under `taskgraph.repositories`.
    pub fn repositories(&self) -> &Value {
        self.get("taskgraph.repositories")
            .expect("validated: taskgraph.repositories is required")
    }
}

/// Load and validate `<root_dir>/config.yml`.
pub fn load_graph_config(root_dir: impl AsRef<Path>) -> Result<GraphConfig> {
    let root_dir = root_dir.as_ref().to_path_buf();
    let config_yml = root_dir.join("config.yml");
    if !config_yml.is_file() {
        return Err(TaskdagError::Config(format!(
            "couldn't find graph configuration: {}",
            config_yml.display()
        )));
    }

    debug!(path = %config_yml.display(), "loading graph config");
    let config = load_yaml(&config_yml)?;
    GraphConfig::new(config, root_dir)
}

fn graph_config_schema() -> Schema {
    let by_level_string = optionally_keyed_by(&["level"], Schema::Str);

    open_map(vec![
        required("trust-domain", Schema::Str),
        required(
            "task-priority",
            optionally_keyed_by(&["project", "level"], schema::enumeration(TASK_PRIORITIES)),
        ),
        required(
            "workers",
            map(vec![required(
                "aliases",
                map_of(map(vec![
                    required("provisioner", by_level_string.clone()),
                    required("implementation", Schema::Str),
                    required("os", Schema::Str),
                    required("worker-type", by_level_string),
                ])),
            )]),
        ),
        required(
            "taskgraph",
            open_map(vec![
                required(
                    "repositories",
                    map_of(open_map(vec![
                        required("name", Schema::Str),
                        optional("project-regex", Schema::Str),
                        optional("default-ref", Schema::Str),
                    ])),
                ),
                optional("register", Schema::Str),
                optional("decision-parameters", Schema::Str),
                optional("cached-task-prefix", Schema::Str),
                optional("index-path-regexes", seq(Schema::Str)),
                optional("max-dependencies", Schema::Int),
                optional("max-routes", Schema::Int),
                optional(
                    "task-deadline-after",
                    any_of(vec![
                        Schema::Str,
                        optionally_keyed_by(&["project"], Schema::Str),
                    ]),
                ),
                optional("task-expires-after", Schema::Str),
            ]),
        ),
    ])
}
