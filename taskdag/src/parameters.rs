// src/parameters.rs

//! The typed, validated, immutable bundle describing the triggering event.
//!
//! Parameters come from a local file, from a previous decision task's
//! `parameters.yml` artifact (via `task-id=`, `project=` or `index=`
//! references), or are defaulted from the VCS and environment. Projects may
//! extend the schema with their own keys at registration time; the composed
//! schema is validated once at construction and the bundle is read-only
//! afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::{Result, TaskdagError};
use crate::platform::PlatformClient;
use crate::util::schema::{self, optional, required, Schema};
use crate::util::yaml;
use crate::vcs::Vcs;

/// Name of the artifact a decision task publishes its parameters under.
pub const PARAMETERS_ARTIFACT: &str = "public/parameters.yml";

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    values: BTreeMap<String, Value>,
}

impl Parameters {
    /// Wrap and validate a parameter mapping against the core schema plus
    /// any project extensions. In non-strict mode, missing parameters are
    /// filled from the static defaults first.
    pub fn new(
        mut values: BTreeMap<String, Value>,
        extensions: &[ParametersExtension],
        strict: bool,
    ) -> Result<Parameters> {
        if !strict {
            for (key, default) in static_defaults() {
                values.entry(key).or_insert(default);
            }
        }
        for extension in extensions {
            for (key, default) in &extension.defaults {
                values.entry(key.clone()).or_insert_with(|| default.clone());
            }
        }

        let composed = composed_schema(extensions, strict);
        let as_value = Value::Object(values.clone().into_iter().collect());
        composed
            .validate(&as_value, "parameters")
            .map_err(|e| TaskdagError::Parameter(e.to_string()))?;

        Ok(Parameters { values })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Like [`Parameters::get`] but failing with a `ParameterError` naming
    /// the key.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| TaskdagError::Parameter(format!("parameter '{key}' not found")))
    }

    pub fn str(&self, key: &str) -> Result<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| TaskdagError::Parameter(format!("parameter '{key}' is not a string")))
    }

    pub fn bool(&self, key: &str) -> Result<bool> {
        self.require(key)?
            .as_bool()
            .ok_or_else(|| TaskdagError::Parameter(format!("parameter '{key}' is not a boolean")))
    }

    pub fn str_list(&self, key: &str) -> Result<Vec<String>> {
        let items = self.require(key)?.as_array().ok_or_else(|| {
            TaskdagError::Parameter(format!("parameter '{key}' is not a list"))
        })?;
        items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    TaskdagError::Parameter(format!("parameter '{key}' contains a non-string"))
                })
            })
            .collect()
    }

    pub fn files_changed(&self) -> Result<Vec<String>> {
        self.str_list("files_changed")
    }

    /// The whole bundle as a JSON mapping (for artifacts and for keyed-by
    /// contexts).
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parameters(project={})", self.values.get("project").and_then(|v| v.as_str()).unwrap_or("?"))
    }
}

/// A project-registered schema fragment composed with the core schema.
#[derive(Debug, Clone, Default)]
pub struct ParametersExtension {
    pub fields: Vec<schema::Field>,
    pub defaults: BTreeMap<String, Value>,
}

fn composed_schema(extensions: &[ParametersExtension], strict: bool) -> Schema {
    let string_list = schema::seq(Schema::Str);
    let mut fields = vec![
        required("base_repository", Schema::Str),
        required("base_ref", Schema::Str),
        required("base_rev", Schema::Str),
        required("build_date", Schema::Int),
        required("build_number", Schema::Int),
        required("do_not_optimize", string_list.clone()),
        required("enable_always_target", schema::any_of(vec![Schema::Bool, string_list.clone()])),
        required("existing_tasks", schema::map_of(Schema::Str)),
        required("files_changed", string_list.clone()),
        required("filters", string_list.clone()),
        required("head_ref", Schema::Str),
        required("head_repository", Schema::Str),
        required("head_rev", Schema::Str),
        required("level", Schema::Str),
        required("next_version", schema::any_of(vec![Schema::Str, null()])),
        required("optimize_strategies", schema::any_of(vec![Schema::Str, null()])),
        required("optimize_target_tasks", Schema::Bool),
        required("owner", Schema::Str),
        required("project", Schema::Str),
        required("pushdate", Schema::Int),
        required("pushlog_id", Schema::Str),
        required("repository_type", Schema::Str),
        required("target_tasks_method", Schema::Str),
        required("tasks_for", Schema::Str),
        required("version", schema::any_of(vec![Schema::Str, null()])),
        optional("target-kinds", string_list),
    ];
    for extension in extensions {
        fields.extend(extension.fields.iter().cloned());
    }

    if strict {
        schema::map(fields)
    } else {
        schema::open_map(fields)
    }
}

fn null() -> Schema {
    Schema::Null
}

/// Context-free defaults applied in non-strict mode.
fn static_defaults() -> BTreeMap<String, Value> {
    let now = Utc::now();

    let mut values = BTreeMap::new();
    values.insert("base_repository".into(), json!(""));
    values.insert("base_ref".into(), json!(""));
    values.insert("base_rev".into(), json!(""));
    values.insert("build_date".into(), json!(now.timestamp()));
    values.insert("build_number".into(), json!(1));
    values.insert("do_not_optimize".into(), json!([]));
    values.insert("enable_always_target".into(), json!(true));
    values.insert("existing_tasks".into(), json!({}));
    values.insert("files_changed".into(), json!([]));
    values.insert("filters".into(), json!(["target_tasks_method"]));
    values.insert("head_ref".into(), json!(""));
    values.insert("head_repository".into(), json!(""));
    values.insert("head_rev".into(), json!(""));
    values.insert("level".into(), json!("1"));
    values.insert("next_version".into(), Value::Null);
    values.insert("optimize_strategies".into(), Value::Null);
    values.insert("optimize_target_tasks".into(), json!(true));
    values.insert("owner".into(), json!("nobody@example.com"));
    values.insert("project".into(), json!(""));
    values.insert("pushdate".into(), json!(now.timestamp()));
    values.insert("pushlog_id".into(), json!("0"));
    values.insert("repository_type".into(), json!("git"));
    values.insert("target_tasks_method".into(), json!("default"));
    values.insert("tasks_for".into(), json!(""));
    values.insert("version".into(), Value::Null);
    values
}

/// Defaults for a parameters bundle generated outside any CI event, filled
/// from the VCS where possible.
fn default_parameters(vcs: &dyn Vcs) -> BTreeMap<String, Value> {
    let head_rev = vcs.head_rev().unwrap_or_default();
    let base_ref = vcs.default_branch().unwrap_or_else(|_| "main".to_string());
    let repository = vcs.remote_url().unwrap_or_default();
    let project = repository
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim_end_matches(".git")
        .to_string();

    let mut values = static_defaults();
    values.insert("base_repository".into(), json!(repository));
    values.insert("base_ref".into(), json!(base_ref));
    values.insert("head_ref".into(), json!(head_rev.clone()));
    values.insert("head_repository".into(), json!(repository));
    values.insert("head_rev".into(), json!(head_rev));
    values.insert("project".into(), json!(project));
    values
}

/// Load parameters from a specification string.
///
/// Accepted forms:
/// - a path to a `.yml` / `.json` file;
/// - `task-id=<id>`: the parameters artifact of that decision task;
/// - `project=<project>`: the latest decision task of the project, found
///   through the index at `<trust-domain>.v2.<project>.latest.taskgraph.decision`;
/// - `index=<path>`: the decision task at an explicit index path;
/// - `None`: defaults filled from the VCS.
pub fn load_parameters(
    spec: Option<&str>,
    strict: bool,
    overrides: &BTreeMap<String, Value>,
    extensions: &[ParametersExtension],
    trust_domain: Option<&str>,
    client: &dyn PlatformClient,
    vcs: &dyn Vcs,
) -> Result<Parameters> {
    let mut values = match spec {
        None => default_parameters(vcs),
        Some(spec) => {
            if let Some(task_id) = spec.strip_prefix("task-id=") {
                fetch_parameters_artifact(client, task_id)?
            } else if let Some(project) = spec.strip_prefix("project=") {
                let trust_domain = trust_domain.ok_or_else(|| {
                    TaskdagError::Parameter(
                        "can't load parameters by project without a trust domain".to_string(),
                    )
                })?;
                let index = format!("{trust_domain}.v2.{project}.latest.taskgraph.decision");
                resolve_indexed_parameters(client, &index)?
            } else if let Some(index) = spec.strip_prefix("index=") {
                resolve_indexed_parameters(client, index)?
            } else {
                read_parameters_file(Path::new(spec))?
            }
        }
    };

    for (key, value) in overrides {
        values.insert(key.clone(), value.clone());
    }

    info!(source = spec.unwrap_or("<defaults>"), "loaded parameters");
    Parameters::new(values, extensions, strict)
}

fn read_parameters_file(path: &Path) -> Result<BTreeMap<String, Value>> {
    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => yaml::load_yaml(path)?,
        Some("json") => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        _ => {
            return Err(TaskdagError::Parameter(format!(
                "parameters file {} is not YAML or JSON",
                path.display()
            )))
        }
    };
    value_to_map(value)
}

fn resolve_indexed_parameters(
    client: &dyn PlatformClient,
    index: &str,
) -> Result<BTreeMap<String, Value>> {
    let task_id = client.find_task_by_index(index)?.ok_or_else(|| {
        TaskdagError::Parameter(format!("no decision task found at index '{index}'"))
    })?;
    fetch_parameters_artifact(client, &task_id)
}

fn fetch_parameters_artifact(
    client: &dyn PlatformClient,
    task_id: &str,
) -> Result<BTreeMap<String, Value>> {
    let bytes = client.get_artifact(task_id, PARAMETERS_ARTIFACT)?;
    let contents = String::from_utf8(bytes).map_err(|e| {
        TaskdagError::Parameter(format!("parameters artifact of {task_id} is not UTF-8: {e}"))
    })?;
    value_to_map(yaml::parse_yaml(&contents)?)
}

fn value_to_map(value: Value) -> Result<BTreeMap<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(TaskdagError::Parameter(format!(
            "parameters must be a mapping, got {other}"
        ))),
    }
}
