// src/transforms/run.rs

//! Translate a high-level `run:` stanza into a concrete worker command.
//!
//! The stanza names its flavour through `using`; implementations are
//! pluggable via the registry. Two ship with the engine:
//!
//! - `run-task`: wraps the command in the repository bootstrap, which
//!   clones the repository at the triggering revision before executing.
//! - `bare`: passes command and environment through untouched.

use serde_json::{json, Map, Value};

use crate::errors::Result;
use crate::registry::Registries;
use crate::util::schema::{any_of, open_map, optional, required, seq, Schema};

use super::{transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.run:transforms";

/// Caches understood by `use-caches`, with the environment variable each
/// tool reads its cache location from.
const CACHES: &[(&str, &str, &str)] = &[
    ("cargo", "CARGO_HOME", "cache/cargo"),
    ("npm", "npm_config_cache", "cache/npm"),
    ("pip", "PIP_CACHE_DIR", "cache/pip"),
    ("uv", "UV_CACHE_DIR", "cache/uv"),
];

pub fn register(registries: &mut Registries) -> Result<()> {
    registries.register_run_using("run-task", run_task)?;
    registries.register_run_using("bare", bare)?;

    let mut transforms = TransformSequence::new();
    transforms.add_validate(run_schema());
    transforms.add(translate_run);
    registries.register_transforms(REFERENCE, transforms)
}

fn run_schema() -> Schema {
    let command = any_of(vec![Schema::Str, seq(Schema::Str)]);
    open_map(vec![optional(
        "run",
        open_map(vec![
            required("using", Schema::Str),
            optional("command", command),
            optional("cwd", Schema::Str),
            optional("use-caches", any_of(vec![Schema::Bool, seq(Schema::Str)])),
            optional("checkout", Schema::Bool),
        ]),
    )])
}

fn translate_run(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let mut out = Vec::with_capacity(tasks.len());

    for mut task in tasks {
        let Some(run) = task.remove("run") else {
            out.push(task);
            continue;
        };

        let using = run
            .get("using")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                transform_error(config, &task, "run stanza has no 'using'".into())
            })?
            .to_string();

        let implementation = config.registries.run_using(&using)?;
        implementation(config, &mut task, &run)?;
        out.push(task);
    }

    Ok(out)
}

/// Access (creating on demand) the `worker` mapping of a stub.
fn worker_mut(task: &mut TaskStub) -> Result<&mut Map<String, Value>> {
    task.entry("worker".to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| {
            crate::errors::TaskdagError::Config("'worker' must be a mapping".to_string())
        })
}

fn command_list(run: &Value) -> Vec<String> {
    match run.get("command") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// `run-task`: check out the repository, then run the command inside it.
fn run_task(config: &TransformConfig, task: &mut TaskStub, run: &Value) -> Result<()> {
    let command = command_list(run);
    if command.is_empty() {
        return Err(transform_error(config, task, "run-task requires a command".into()));
    }

    let head_repository = config.params.str("head_repository")?.to_string();
    let head_rev = config.params.str("head_rev")?.to_string();
    let head_ref = config.params.str("head_ref")?.to_string();
    let repository_type = config.params.str("repository_type")?.to_string();
    let checkout = run.get("checkout").and_then(|v| v.as_bool()).unwrap_or(true);

    let use_caches: Vec<&str> = match run.get("use-caches") {
        Some(Value::Bool(false)) => Vec::new(),
        Some(Value::Bool(true)) | None => CACHES.iter().map(|(name, _, _)| *name).collect(),
        Some(Value::Array(items)) => {
            let requested: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            if let Some(unknown) = requested
                .iter()
                .find(|r| !CACHES.iter().any(|(name, _, _)| name == *r))
            {
                return Err(transform_error(
                    config,
                    task,
                    format!("unknown cache '{unknown}' in use-caches"),
                ));
            }
            requested
        }
        Some(other) => {
            return Err(transform_error(
                config,
                task,
                format!("invalid use-caches: {other}"),
            ))
        }
    };

    let worker = worker_mut(task)?;

    let env = worker
        .entry("env".to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| {
            crate::errors::TaskdagError::Config("'worker.env' must be a mapping".to_string())
        })?;
    env.insert("REPOSITORY_URL".to_string(), json!(head_repository));
    env.insert("REPOSITORY_TYPE".to_string(), json!(repository_type));
    env.insert("HEAD_REV".to_string(), json!(head_rev));
    env.insert("HEAD_REF".to_string(), json!(head_ref));

    let mut caches: Vec<Value> = Vec::new();
    for name in use_caches {
        let (_, env_var, mount) = CACHES
            .iter()
            .find(|(n, _, _)| *n == name)
            .expect("validated above");
        env.insert(env_var.to_string(), json!(format!("/builds/worker/{mount}")));
        caches.push(json!({
            "name": format!("{}-{name}", config.graph_config.trust_domain()),
            "mount-point": format!("/builds/worker/{mount}"),
        }));
    }
    if !caches.is_empty() {
        worker.insert("caches".to_string(), Value::Array(caches));
    }

    let mut full_command: Vec<Value> = vec![json!("run-task")];
    if checkout {
        full_command.push(json!("--checkout=/builds/worker/checkouts/vcs"));
    }
    if let Some(cwd) = run.get("cwd").and_then(|v| v.as_str()) {
        full_command.push(json!(format!("--cwd={cwd}")));
    }
    full_command.push(json!("--"));
    full_command.push(json!("bash"));
    full_command.push(json!("-cx"));
    full_command.push(json!(command.join(" && ")));
    worker.insert("command".to_string(), Value::Array(full_command));

    Ok(())
}

/// `bare`: the command is already complete.
fn bare(config: &TransformConfig, task: &mut TaskStub, run: &Value) -> Result<()> {
    let command = command_list(run);
    if command.is_empty() {
        return Err(transform_error(config, task, "bare requires a command".into()));
    }

    let worker = worker_mut(task)?;
    worker.insert(
        "command".to_string(),
        Value::Array(command.into_iter().map(Value::String).collect()),
    );
    Ok(())
}
