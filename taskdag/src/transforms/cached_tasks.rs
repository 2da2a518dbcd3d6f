// src/transforms/cached_tasks.rs

//! Advertise task results in the index so future generations can reuse
//! them.
//!
//! A task opting in via a `cache` stanza gets a digest computed over its
//! declared inputs plus the digests of its cached parents; the digest is
//! both published as index routes and consumed through an `index-search`
//! optimization, which is what lets the optimizer substitute a previously
//! computed task.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::errors::Result;
use crate::graph::Graph;
use crate::registry::Registries;
use crate::util::hash::hash_strings;
use crate::util::schema::{map, open_map, optional, required, seq, Schema};

use super::{stub_name, transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.cached_tasks:transforms";

/// Index route templates for cached tasks.
const CACHE_INDEX: &str = "{prefix}.cache.level-{level}.{type}.{name}.hash.{digest}";
const EXTRA_CACHE_INDEXES: &[&str] = &[
    "{prefix}.cache.level-{level}.{type}.{name}.latest",
    "{prefix}.cache.level-{level}.{type}.{name}.pushdate.{build_date_long}",
];

pub fn register(registries: &mut Registries) -> Result<()> {
    let mut transforms = TransformSequence::new();
    transforms.add_validate(cache_schema());
    transforms.add(cache_task);
    registries.register_transforms(REFERENCE, transforms)
}

fn cache_schema() -> Schema {
    open_map(vec![optional(
        "cache",
        map(vec![
            required("type", Schema::Str),
            required("name", Schema::Str),
            required("digest-data", seq(Schema::Str)),
        ]),
    )])
}

fn cache_task(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    // Digests of already-loaded kind dependencies.
    let mut digests: BTreeMap<String, String> = BTreeMap::new();
    for task in config.kind_dependencies_tasks.values() {
        if let Some(cached) = task.attributes.get("cached_task") {
            digests.insert(task.label.clone(), format_task_digest(cached));
        }
    }

    let mut out = Vec::with_capacity(tasks.len());
    for mut task in order_tasks(config, tasks)? {
        let Some(cache) = task.remove("cache") else {
            out.push(task);
            continue;
        };

        let cache_type = cache.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let cache_name = cache.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let mut digest_data: Vec<String> = cache
            .get("digest-data")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        // Each parent's digest feeds this task's digest, so a changed
        // parent invalidates the whole chain.
        let mut dependency_digests = Vec::new();
        if let Some(Value::Object(dependencies)) = task.get("dependencies") {
            for dep in dependencies.values() {
                let Some(dep) = dep.as_str() else { continue };
                match digests.get(dep) {
                    Some(digest) => dependency_digests.push(digest.clone()),
                    None => {
                        return Err(transform_error(
                            config,
                            &task,
                            format!("cached task has uncached parent task: {dep}"),
                        ))
                    }
                }
            }
        }
        dependency_digests.sort();
        digest_data.extend(dependency_digests);

        let digest = hash_strings(&digest_data);
        add_optimization(config, &mut task, cache_type, cache_name, &digest)?;

        let label = stub_label(config, &task)?;
        digests.insert(
            label,
            format!("{cache_type}/{cache_name}/{digest}"),
        );
        out.push(task);
    }

    Ok(out)
}

/// Yield stubs so that intra-kind parents come before their dependents.
fn order_tasks(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let mut pending: BTreeMap<String, TaskStub> = BTreeMap::new();
    for task in tasks {
        pending.insert(stub_label(config, &task)?, task);
    }

    let mut edges = Vec::new();
    for (label, task) in &pending {
        if let Some(Value::Object(dependencies)) = task.get("dependencies") {
            for dep in dependencies.values() {
                if let Some(dep) = dep.as_str() {
                    if pending.contains_key(dep) {
                        edges.push((label.clone(), dep.to_string(), String::new()));
                    }
                }
            }
        }
    }

    let graph = Graph::new(pending.keys().cloned(), edges);
    let mut ordered = Vec::with_capacity(pending.len());
    for label in graph.visit_postorder()? {
        ordered.push(pending.remove(&label).expect("graph nodes come from pending"));
    }
    Ok(ordered)
}

fn add_optimization(
    config: &TransformConfig,
    task: &mut TaskStub,
    cache_type: &str,
    cache_name: &str,
    digest: &str,
) -> Result<()> {
    let prefix = config.graph_config.cached_task_prefix();
    let level: u64 = config
        .params
        .str("level")?
        .parse()
        .map_err(|_| transform_error(config, task, "parameter 'level' is not numeric".into()))?;

    let subs = |template: &str, level: u64, build_date_long: &str| {
        template
            .replace("{prefix}", prefix)
            .replace("{level}", &level.to_string())
            .replace("{type}", cache_type)
            .replace("{name}", cache_name)
            .replace("{digest}", digest)
            .replace("{build_date_long}", build_date_long)
    };

    // Look for a cached version at the current level and above, highest
    // level first.
    let mut index_paths: Vec<Value> = Vec::new();
    for l in (level..=3).rev() {
        index_paths.push(Value::String(subs(CACHE_INDEX, l, "")));
    }
    task.insert(
        "optimization".to_string(),
        json!({ "index-search": Value::Array(index_paths) }),
    );

    // ... and publish at the current level.
    let build_date = config
        .params
        .require("build_date")?
        .as_i64()
        .unwrap_or_default();
    let build_date_long = chrono::DateTime::from_timestamp(build_date, 0)
        .map(|t| t.format("%Y.%m.%d.%Y%m%d%H%M%S").to_string())
        .unwrap_or_default();

    let mut routes: Vec<Value> = match task.get("routes") {
        Some(Value::Array(existing)) => existing.clone(),
        _ => Vec::new(),
    };
    routes.push(Value::String(format!("index.{}", subs(CACHE_INDEX, level, ""))));
    for template in EXTRA_CACHE_INDEXES {
        routes.push(Value::String(format!(
            "index.{}",
            subs(template, level, &build_date_long)
        )));
    }
    task.insert("routes".to_string(), Value::Array(routes));

    let attributes = task
        .entry("attributes".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(attributes) = attributes.as_object_mut() {
        attributes.insert(
            "cached_task".to_string(),
            json!({ "type": cache_type, "name": cache_name, "digest": digest }),
        );
    }

    Ok(())
}

fn format_task_digest(cached: &Value) -> String {
    format!(
        "{}/{}/{}",
        cached.get("type").and_then(|v| v.as_str()).unwrap_or(""),
        cached.get("name").and_then(|v| v.as_str()).unwrap_or(""),
        cached.get("digest").and_then(|v| v.as_str()).unwrap_or(""),
    )
}

fn stub_label(config: &TransformConfig, task: &TaskStub) -> Result<String> {
    match task.get("label").and_then(|v| v.as_str()) {
        Some(label) => Ok(label.to_string()),
        None => match stub_name(task) {
            Some(name) => Ok(format!("{}-{name}", config.kind)),
            None => Err(transform_error(config, task, "task has no name".into())),
        },
    }
}
