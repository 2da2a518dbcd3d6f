// src/transforms/task.rs

//! The final transform of every pipeline: lower the high-level task
//! description into the platform's wire format.
//!
//! Everything user-facing (worker aliases, relative datestamps, treeherder
//! shorthand, priorities keyed by project or level) is resolved here, so
//! downstream phases only ever see concrete wire-format definitions.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::errors::Result;
use crate::registry::Registries;
use crate::util::keyed_by::evaluate_keyed_by;
use crate::util::schema::{
    self, any_of, enumeration, map_of, open_map, optional, optionally_keyed_by, required, seq,
    Schema, TASK_PRIORITIES,
};
use crate::util::time::{format_time, json_time_from_now};
use crate::util::treeherder::{split_platform, split_symbol};

use super::{stub_name, transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.task:transforms";

/// The reserved edge name emitted by the docker-image machinery; user
/// configuration may not use it.
pub const DOCKER_IMAGE_EDGE: &str = "docker-image";

pub fn register(registries: &mut Registries) -> Result<()> {
    let mut transforms = TransformSequence::new();
    transforms.add_validate(task_description_schema());
    transforms.add(build_tasks);
    registries.register_transforms(REFERENCE, transforms)
}

/// Schema of the high-level task description accepted by this transform.
pub fn task_description_schema() -> Schema {
    open_map(vec![
        optional("name", Schema::Str),
        optional("label", Schema::Str),
        optional("description", Schema::Str),
        optional("attributes", map_of(Schema::Any)),
        optional("dependencies", map_of(Schema::Str)),
        optional("soft-dependencies", seq(Schema::Str)),
        optional("if-dependencies", seq(Schema::Str)),
        optional("requires", enumeration(&["all-completed", "all-resolved"])),
        optional("priority", optionally_keyed_by(&["project", "level"], enumeration(TASK_PRIORITIES))),
        optional("retries", Schema::Int),
        optional("routes", seq(Schema::Str)),
        optional("scopes", seq(Schema::Str)),
        optional("tags", map_of(Schema::Str)),
        optional("extra", map_of(Schema::Any)),
        optional("always-target", Schema::Bool),
        optional("run-on-projects", seq(Schema::Str)),
        optional("run-on-git-branches", seq(Schema::Str)),
        optional("deadline-after", Schema::Str),
        optional("expires-after", Schema::Str),
        optional(
            "treeherder",
            schema::map(vec![
                required("symbol", Schema::Str),
                optional("platform", Schema::Str),
                optional("tier", Schema::Int),
                optional("kind", enumeration(&["build", "test", "other"])),
            ]),
        ),
        required("worker-type", Schema::Str),
        optional("worker", open_map(vec![])),
        optional(
            "optimization",
            any_of(vec![Schema::Null, map_of(Schema::Any)]),
        ),
    ])
}

fn build_tasks(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let now = Utc::now();
    let mut out = Vec::with_capacity(tasks.len());

    for task in tasks {
        let label = match task.get("label").and_then(|v| v.as_str()) {
            Some(label) => label.to_string(),
            None => {
                let name = stub_name(&task).ok_or_else(|| {
                    transform_error(config, &task, "task has neither label nor name".into())
                })?;
                format!("{}-{name}", config.kind)
            }
        };

        let err =
            |task: &TaskStub, message: String| transform_error(config, task, message);

        // Dependencies. The docker-image edge is reserved for the image
        // machinery; user kinds may not claim it.
        let dependencies = match task.get("dependencies") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        if dependencies.contains_key(DOCKER_IMAGE_EDGE) {
            return Err(err(
                &task,
                format!("the '{DOCKER_IMAGE_EDGE}' dependency edge is reserved"),
            ));
        }

        // if-dependencies arrive as edge names; resolve them to labels.
        let mut if_dependencies: Vec<Value> = Vec::new();
        if let Some(Value::Array(edges)) = task.get("if-dependencies") {
            for edge in edges {
                let edge = edge.as_str().unwrap_or_default();
                let dep = dependencies
                    .get(edge)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        err(
                            &task,
                            format!("if-dependencies names unknown dependency edge '{edge}'"),
                        )
                    })?;
                if_dependencies.push(Value::String(dep.to_string()));
            }
        }

        // Worker alias resolution; provisioner and worker-type may be keyed
        // by level.
        let alias = task
            .get("worker-type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| err(&task, "task has no worker-type".into()))?;
        let alias_config = config.graph_config.worker_alias(alias)?.clone();
        let level_ctx: BTreeMap<String, Value> = [
            ("level".to_string(), json!(config.params.str("level")?)),
            ("project".to_string(), json!(config.params.str("project")?)),
        ]
        .into();
        let provisioner = evaluate_keyed_by(
            alias_config.get("provisioner").unwrap_or(&Value::Null),
            &format!("provisioner of worker alias {alias}"),
            &level_ctx,
        )?;
        let worker_type = evaluate_keyed_by(
            alias_config.get("worker-type").unwrap_or(&Value::Null),
            &format!("worker-type of worker alias {alias}"),
            &level_ctx,
        )?;
        let implementation = alias_config
            .get("implementation")
            .and_then(|v| v.as_str())
            .unwrap_or("generic-worker")
            .to_string();
        let worker_os = alias_config
            .get("os")
            .and_then(|v| v.as_str())
            .unwrap_or("linux")
            .to_string();

        // Priority: task-level override, else the graph default; either may
        // be keyed by project or level.
        let priority_value = task
            .get("priority")
            .cloned()
            .unwrap_or_else(|| config.graph_config.task_priority().clone());
        let priority = evaluate_keyed_by(
            &priority_value,
            &format!("priority of {label}"),
            &level_ctx,
        )?;

        // Timestamps.
        let deadline_after = task
            .get("deadline-after")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                config
                    .graph_config
                    .get("taskgraph.task-deadline-after")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "1 day".to_string());
        let expires_after = task
            .get("expires-after")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                config
                    .graph_config
                    .get("taskgraph.task-expires-after")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| {
                if config.params.str("level").unwrap_or("1") == "3" {
                    "1 year".to_string()
                } else {
                    "28 days".to_string()
                }
            });

        // Routes and treeherder metadata.
        let mut routes: Vec<Value> = match task.get("routes") {
            Some(Value::Array(existing)) => existing.clone(),
            _ => Vec::new(),
        };
        let mut extra: Map<String, Value> = match task.get("extra") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        if let Some(treeherder) = task.get("treeherder") {
            let symbol = treeherder
                .get("symbol")
                .and_then(|v| v.as_str())
                .ok_or_else(|| err(&task, "treeherder stanza has no symbol".into()))?;
            let (group, sym) = split_symbol(symbol);
            let tier = treeherder.get("tier").and_then(|v| v.as_u64()).unwrap_or(1);
            let job_kind = treeherder
                .get("kind")
                .and_then(|v| v.as_str())
                .unwrap_or("other");

            let mut th = Map::new();
            th.insert("symbol".to_string(), json!(sym));
            if group != "?" {
                th.insert("groupSymbol".to_string(), json!(group));
            }
            th.insert("tier".to_string(), json!(tier));
            th.insert("jobKind".to_string(), json!(job_kind));
            if let Some(platform) = treeherder.get("platform").and_then(|v| v.as_str()) {
                let (machine_platform, collection) = split_platform(platform)?;
                th.insert("machine".to_string(), json!({ "platform": machine_platform }));
                let mut collections = Map::new();
                collections.insert(collection, json!(true));
                th.insert("collection".to_string(), Value::Object(collections));
            }
            extra.insert("treeherder".to_string(), Value::Object(th));

            let project = config.params.str("project")?;
            let head_rev = config.params.str("head_rev")?;
            let pushlog_id = config.params.str("pushlog_id")?;
            routes.push(Value::String(format!(
                "tc-treeherder.v2.{project}.{head_rev}.{pushlog_id}"
            )));
        }

        // Attributes recorded for filters and optimizers.
        let mut attributes: Map<String, Value> = match task.get("attributes") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        attributes.insert("kind".to_string(), json!(config.kind));
        if let Some(Value::Array(projects)) = task.get("run-on-projects") {
            attributes.insert("run_on_projects".to_string(), Value::Array(projects.clone()));
        }
        if let Some(Value::Array(branches)) = task.get("run-on-git-branches") {
            attributes.insert(
                "run_on_git_branches".to_string(),
                Value::Array(branches.clone()),
            );
        }
        if task
            .get("always-target")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
        {
            attributes.insert("always_target".to_string(), json!(true));
        }

        let worker = match task.get("worker") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        let payload = build_payload(config, &task, &implementation, &worker_os, &worker)?;

        let description = task
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let owner = config.params.str("owner")?;
        let source = config.params.str("head_repository")?;

        let mut task_def = Map::new();
        if let Value::String(provisioner) = &provisioner {
            task_def.insert("provisionerId".to_string(), json!(provisioner));
        }
        if let Value::String(worker_type) = &worker_type {
            task_def.insert("workerType".to_string(), json!(worker_type));
        }
        task_def.insert("priority".to_string(), priority);
        if let Some(retries) = task.get("retries").and_then(|v| v.as_u64()) {
            task_def.insert("retries".to_string(), json!(retries));
        }
        if let Some(requires) = task.get("requires").and_then(|v| v.as_str()) {
            task_def.insert("requires".to_string(), json!(requires));
        }
        task_def.insert("created".to_string(), json!(format_time(now)));
        task_def.insert(
            "deadline".to_string(),
            json!(json_time_from_now(&deadline_after, now)?),
        );
        task_def.insert(
            "expires".to_string(),
            json!(json_time_from_now(&expires_after, now)?),
        );
        task_def.insert(
            "metadata".to_string(),
            json!({
                "name": label,
                "description": description,
                "owner": owner,
                "source": source,
            }),
        );
        if !routes.is_empty() {
            task_def.insert("routes".to_string(), Value::Array(routes));
        }
        if let Some(Value::Array(scopes)) = task.get("scopes") {
            task_def.insert("scopes".to_string(), Value::Array(scopes.clone()));
        }
        if let Some(Value::Object(tags)) = task.get("tags") {
            task_def.insert("tags".to_string(), Value::Object(tags.clone()));
        }
        if !extra.is_empty() {
            task_def.insert("extra".to_string(), Value::Object(extra));
        }
        task_def.insert("payload".to_string(), payload);

        let mut built = Map::new();
        built.insert("label".to_string(), json!(label));
        built.insert("description".to_string(), json!(description));
        built.insert("attributes".to_string(), Value::Object(attributes));
        built.insert("dependencies".to_string(), Value::Object(dependencies));
        if let Some(soft) = task.get("soft-dependencies") {
            built.insert("soft-dependencies".to_string(), soft.clone());
        }
        if !if_dependencies.is_empty() {
            built.insert("if-dependencies".to_string(), Value::Array(if_dependencies));
        }
        if let Some(optimization) = task.get("optimization") {
            built.insert("optimization".to_string(), optimization.clone());
        }
        built.insert("task".to_string(), Value::Object(task_def));
        out.push(built);
    }

    Ok(out)
}

/// Build the worker payload for the alias's implementation.
fn build_payload(
    config: &TransformConfig,
    task: &TaskStub,
    implementation: &str,
    worker_os: &str,
    worker: &Map<String, Value>,
) -> Result<Value> {
    let env = worker.get("env").cloned().unwrap_or_else(|| json!({}));
    let command = worker.get("command").cloned().unwrap_or_else(|| json!([]));
    let max_run_time = worker
        .get("max-run-time")
        .and_then(|v| v.as_u64())
        .unwrap_or(3600);

    let artifacts = || -> Value {
        let Some(Value::Array(artifacts)) = worker.get("artifacts") else {
            return json!([]);
        };
        Value::Array(
            artifacts
                .iter()
                .map(|a| {
                    json!({
                        "name": a.get("name").cloned().unwrap_or_default(),
                        "path": a.get("path").cloned().unwrap_or_default(),
                        "type": a.get("type").cloned().unwrap_or_else(|| json!("directory")),
                    })
                })
                .collect(),
        )
    };

    match implementation {
        "docker-worker" => {
            let image = worker.get("docker-image").cloned().ok_or_else(|| {
                transform_error(config, task, "docker-worker requires a docker-image".into())
            })?;

            let mut payload = Map::new();
            payload.insert("image".to_string(), image);
            payload.insert("command".to_string(), command);
            payload.insert("env".to_string(), env);
            payload.insert("maxRunTime".to_string(), json!(max_run_time));
            if let Some(Value::Array(caches)) = worker.get("caches") {
                let mut cache_map = Map::new();
                for cache in caches {
                    let (Some(name), Some(mount)) = (
                        cache.get("name").and_then(|v| v.as_str()),
                        cache.get("mount-point").and_then(|v| v.as_str()),
                    ) else {
                        continue;
                    };
                    cache_map.insert(name.to_string(), json!(mount));
                }
                payload.insert("cache".to_string(), Value::Object(cache_map));
            }
            let artifacts = artifacts();
            if artifacts.as_array().is_some_and(|a| !a.is_empty()) {
                payload.insert("artifacts".to_string(), artifacts);
            }
            if worker
                .get("chain-of-trust")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            {
                payload.insert("features".to_string(), json!({ "chainOfTrust": true }));
            }
            Ok(Value::Object(payload))
        }
        "generic-worker" => {
            let mut payload = Map::new();
            // Generic workers take a list of command lines; on POSIX
            // systems each line is itself an argv list.
            let command = match command {
                Value::Array(items)
                    if items.iter().all(|i| i.is_string()) && worker_os != "windows" =>
                {
                    json!([items])
                }
                other => other,
            };
            payload.insert("command".to_string(), command);
            payload.insert("env".to_string(), env);
            payload.insert("maxRunTime".to_string(), json!(max_run_time));
            let artifacts = artifacts();
            if artifacts.as_array().is_some_and(|a| !a.is_empty()) {
                payload.insert("artifacts".to_string(), artifacts);
            }
            if let Some(mounts) = worker.get("mounts") {
                payload.insert("mounts".to_string(), mounts.clone());
            }
            Ok(Value::Object(payload))
        }
        other => Err(transform_error(
            config,
            task,
            format!("unknown worker implementation '{other}'"),
        )),
    }
}
