// src/transforms/from_deps.rs

//! Create tasks based on kind-dependency tasks.
//!
//! Useful when follow-up work is needed for some indeterminate subset of
//! upstream tasks — a signing task after each build, whatever builds exist.
//! Dependencies are grouped by a pluggable strategy; one task is produced
//! per group, named after and optionally copying attributes from the
//! dependency of the *primary* kind (the first listed one present in the
//! group).

use serde_json::{Map, Value};

use crate::errors::Result;
use crate::registry::Registries;
use crate::task::Task;
use crate::util::attributes::attrmatch;
use crate::util::schema::{any_of, map_of, open_map, optional, seq, Schema};

use super::{transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.from_deps:transforms";

pub fn register(registries: &mut Registries) -> Result<()> {
    registries.register_group_by("single", group_by_single)?;
    registries.register_group_by("all", group_by_all)?;
    registries.register_group_by("attribute", group_by_attribute)?;

    let mut transforms = TransformSequence::new();
    transforms.add_validate(from_deps_schema());
    transforms.add(from_deps);
    registries.register_transforms(REFERENCE, transforms)
}

fn from_deps_schema() -> Schema {
    open_map(vec![optional(
        "from-deps",
        open_map(vec![
            optional("kinds", seq(Schema::Str)),
            optional("with-attributes", map_of(Schema::Any)),
            optional(
                "group-by",
                any_of(vec![Schema::Str, map_of(Schema::Any)]),
            ),
            optional("copy-attributes", Schema::Bool),
        ]),
    )])
}

fn from_deps(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let mut out = Vec::new();

    for mut task in tasks {
        let Some(from_deps) = task.remove("from-deps") else {
            out.push(task);
            continue;
        };

        let kind_deps: Vec<String> = config
            .config
            .get("kind-dependencies")
            .and_then(|v| v.as_array())
            .map(|deps| {
                deps.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let kinds: Vec<String> = match from_deps.get("kinds").and_then(|v| v.as_array()) {
            Some(kinds) => kinds
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            None => kind_deps.clone(),
        };

        let invalid: Vec<&String> = kinds.iter().filter(|k| !kind_deps.contains(k)).collect();
        if !invalid.is_empty() {
            return Err(transform_error(
                config,
                &task,
                format!(
                    "from-deps.kinds names kinds missing from kind-dependencies: {}",
                    invalid
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
        if kinds.is_empty() {
            return Err(transform_error(
                config,
                &task,
                "from-deps requires at least one kind in kind-dependencies".into(),
            ));
        }

        // Candidate dependencies, filtered by kind and attributes.
        let with_attributes = from_deps.get("with-attributes");
        let deps: Vec<&Task> = config
            .kind_dependencies_tasks
            .values()
            .filter(|t| kinds.contains(&t.kind))
            .filter(|t| match with_attributes {
                Some(conditions) => attrmatch(&t.attributes, conditions),
                None => true,
            })
            .collect();

        // Resolve the grouping strategy.
        let (group_by_name, group_by_arg) = match from_deps.get("group-by") {
            None | Some(Value::Null) => ("single".to_string(), None),
            // `attribute=platform` is shorthand for `{attribute: platform}`.
            Some(Value::String(name)) => match name.split_once('=') {
                Some((name, arg)) => (name.to_string(), Some(Value::String(arg.to_string()))),
                None => (name.clone(), None),
            },
            Some(Value::Object(map)) if map.len() == 1 => {
                let (name, arg) = map.iter().next().expect("len checked");
                (name.clone(), Some(arg.clone()))
            }
            Some(other) => {
                return Err(transform_error(
                    config,
                    &task,
                    format!("invalid group-by: {other}"),
                ))
            }
        };
        let group_by = config.registries.group_by(&group_by_name)?;
        let groups = group_by(config, deps, group_by_arg.as_ref())?;

        let copy_attributes = from_deps
            .get("copy-attributes")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        for group in groups {
            // One task per kind per group, so the dependency edges (named
            // after the kind) stay unambiguous.
            let group_kinds: Vec<&str> = group.iter().map(|t| t.kind.as_str()).collect();
            let mut unique = group_kinds.clone();
            unique.sort();
            unique.dedup();
            if unique.len() < group.len() {
                return Err(transform_error(
                    config,
                    &task,
                    "from-deps groups allow a single task per kind".into(),
                ));
            }

            let mut new_task = task.clone();

            let mut dependencies = Map::new();
            for dep in &group {
                dependencies.insert(dep.kind.clone(), Value::String(dep.label.clone()));
            }
            new_task.insert("dependencies".to_string(), Value::Object(dependencies));

            let primary_kind = kinds
                .iter()
                .find(|k| group_kinds.contains(&k.as_str()))
                .ok_or_else(|| {
                    transform_error(config, &task, "could not detect primary kind".into())
                })?;
            let primary_dep = group
                .iter()
                .find(|t| &t.kind == primary_kind)
                .expect("primary kind is drawn from the group");

            let name = match primary_dep.label.strip_prefix(&format!("{primary_kind}-")) {
                Some(rest) => rest.to_string(),
                None => primary_dep.label.clone(),
            };
            new_task.insert("name".to_string(), Value::String(name));

            let mut attributes: Map<String, Value> = if copy_attributes {
                let mut copied: Map<String, Value> = primary_dep
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                // Explicit attributes on the stub win over copied ones.
                if let Some(Value::Object(own)) = new_task.get("attributes") {
                    copied.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                copied
            } else {
                match new_task.get("attributes") {
                    Some(Value::Object(own)) => own.clone(),
                    _ => Map::new(),
                }
            };
            attributes.insert(
                "primary-kind-dependency".to_string(),
                Value::String(primary_kind.clone()),
            );
            attributes.insert(
                "primary-dependency-label".to_string(),
                Value::String(primary_dep.label.clone()),
            );
            new_task.insert("attributes".to_string(), Value::Object(attributes));

            out.push(new_task);
        }
    }

    Ok(out)
}

fn group_by_single(
    _config: &TransformConfig,
    tasks: Vec<&Task>,
    _arg: Option<&Value>,
) -> Result<Vec<Vec<Task>>> {
    Ok(tasks.into_iter().map(|t| vec![t.clone()]).collect())
}

fn group_by_all(
    _config: &TransformConfig,
    tasks: Vec<&Task>,
    _arg: Option<&Value>,
) -> Result<Vec<Vec<Task>>> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![tasks.into_iter().cloned().collect()])
}

/// Group by the value of a task attribute; tasks without the attribute are
/// left out.
fn group_by_attribute(
    config: &TransformConfig,
    tasks: Vec<&Task>,
    arg: Option<&Value>,
) -> Result<Vec<Vec<Task>>> {
    let attr = arg.and_then(|v| v.as_str()).ok_or_else(|| {
        crate::errors::TaskdagError::Transform {
            kind: config.kind.clone(),
            label: None,
            message: "group-by: attribute requires an attribute name".to_string(),
        }
    })?;

    let mut groups: std::collections::BTreeMap<String, Vec<Task>> = Default::default();
    for task in tasks {
        let Some(value) = task.attributes.get(attr) else {
            continue;
        };
        let key = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        groups.entry(key).or_default().push(task.clone());
    }
    Ok(groups.into_values().collect())
}
