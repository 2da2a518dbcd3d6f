// src/commands.rs

//! Subcommand implementations: each maps onto one generator phase.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::info;

use taskdag::generator::{GeneratorSettings, ParametersInput, TaskGraphGenerator};
use taskdag::platform::{PlatformClient, StaticPlatformClient};
use taskdag::taskgraph::TaskGraph;
use taskdag::vcs::NullVcs;

use crate::cli::{DecisionArgs, ShowArgs};

/// Which phase a show subcommand renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Full,
    Target,
    TargetGraph,
    Optimized,
    Morphed,
}

/// Generate and print one phase, once per `--parameters` set.
///
/// Each set runs on its own worker thread with its rendered output
/// buffered; buffers print under a per-set header as workers finish. Any
/// failing set makes the whole invocation fail, after every set has had
/// its chance.
pub fn show(phase: Phase, args: &ShowArgs) -> Result<()> {
    if args.diff.is_some() {
        bail!(
            "--diff needs a second working copy and is not supported by this \
             front-end; generate against both revisions and compare the JSON output"
        );
    }

    let specs: Vec<Option<String>> = if args.parameters.is_empty() {
        vec![None]
    } else {
        args.parameters.iter().cloned().map(Some).collect()
    };

    if specs.len() == 1 {
        let output = generate_one(phase, args, specs.into_iter().next().expect("one"))?;
        println!("{output}");
        return Ok(());
    }

    // One worker per parameters set; no shared state beyond the arguments.
    let failures = thread::scope(|scope| {
        let mut handles = Vec::new();
        for spec in specs {
            let header = spec.clone().unwrap_or_else(|| "<defaults>".to_string());
            handles.push((
                header,
                scope.spawn(move || generate_one(phase, args, spec)),
            ));
        }

        let mut failures = 0;
        for (header, handle) in handles {
            println!("> Task graph for parameters {header}");
            match handle.join() {
                Ok(Ok(output)) => println!("{output}"),
                Ok(Err(e)) => {
                    eprintln!("generation failed for {header}: {e:?}");
                    failures += 1;
                }
                Err(_) => {
                    eprintln!("generation worker for {header} panicked");
                    failures += 1;
                }
            }
        }
        failures
    });

    if failures > 0 {
        bail!("{failures} parameter set(s) failed");
    }
    Ok(())
}

fn generate_one(phase: Phase, args: &ShowArgs, spec: Option<String>) -> Result<String> {
    let mut overrides = BTreeMap::new();
    if !args.target_kind.is_empty() {
        overrides.insert(
            "target-kinds".to_string(),
            Value::Array(
                args.target_kind
                    .iter()
                    .map(|k| Value::String(k.clone()))
                    .collect(),
            ),
        );
    }

    let mut generator = TaskGraphGenerator::new(
        &args.root,
        ParametersInput::Spec {
            spec,
            strict: false,
            overrides,
        },
        Arc::new(StaticPlatformClient::default()),
        Arc::new(NullVcs),
        GeneratorSettings {
            fast: args.fast,
            enable_verifications: !args.no_verify,
            ..Default::default()
        },
        None,
    )?;

    let graph = match phase {
        Phase::Full => generator.full_task_graph()?,
        Phase::Target => generator.target_task_set()?,
        Phase::TargetGraph => generator.target_task_graph()?,
        Phase::Optimized => generator.optimized_task_graph()?,
        Phase::Morphed => generator.morphed_task_graph()?,
    };

    format_taskgraph(graph, args)
}

/// Render a graph as labels (in postorder) or as a JSON object.
fn format_taskgraph(graph: &TaskGraph, args: &ShowArgs) -> Result<String> {
    let tasks_regex = args
        .tasks
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --tasks regex")?;

    if !args.json {
        let mut lines = Vec::new();
        for label in graph.graph.visit_postorder()? {
            if tasks_regex
                .as_ref()
                .is_some_and(|re| !re.is_match(&label))
            {
                continue;
            }
            lines.push(label);
        }
        return Ok(lines.join("\n"));
    }

    let mut json = graph.to_json()?;
    if let Some(map) = json.as_object_mut() {
        if let Some(re) = &tasks_regex {
            map.retain(|label, _| re.is_match(label));
        }
        for record in map.values_mut() {
            for path in &args.exclude_keys {
                exclude_key(record, path);
            }
        }
    }
    Ok(serde_json::to_string_pretty(&sort_keys(&json))?)
}

/// Rebuild a value with every mapping's keys in sorted order. The pipeline
/// keeps mappings in document order; rendered output is sorted so it is
/// stable under reformatting of the source configuration.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, val)| (key.clone(), sort_keys(val)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Remove a dotted key path from a task record, ignoring missing segments.
fn exclude_key(record: &mut Value, path: &str) {
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        if let Some(map) = record.as_object_mut() {
            map.remove(path);
        }
        return;
    };

    let mut current = record;
    for part in parents.split('.') {
        match current.as_object_mut().and_then(|m| m.get_mut(part)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(leaf);
    }
}

/// The decision flow: generate everything, persist the artifacts, and
/// submit the final graph.
pub fn decision(args: &DecisionArgs) -> Result<()> {
    let client = Arc::new(StaticPlatformClient::default());

    let mut generator = TaskGraphGenerator::new(
        &args.root,
        ParametersInput::Spec {
            spec: args.parameters.clone(),
            strict: false,
            overrides: BTreeMap::new(),
        },
        client.clone(),
        Arc::new(NullVcs),
        GeneratorSettings {
            decision_task_id: args.decision_id.clone(),
            write_artifacts: true,
            fast: args.fast,
            enable_verifications: !args.no_verify,
        },
        None,
    )?;

    let output_dir = Path::new(&args.output_dir);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating artifact directory {}", output_dir.display()))?;

    let write = |name: &str, value: &Value| -> Result<()> {
        let path = output_dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(&sort_keys(value))?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!(artifact = name, "wrote artifact");
        Ok(())
    };

    write("parameters.json", &generator.parameters()?.to_json())?;
    let full = generator.full_task_graph()?.to_json()?;
    write("full-task-graph.json", &full)?;

    let target_labels: Vec<Value> = generator
        .target_task_set()?
        .tasks
        .keys()
        .map(|l| Value::String(l.clone()))
        .collect();
    write("target-tasks.json", &Value::Array(target_labels))?;

    let morphed = generator.morphed_task_graph()?.clone();
    write("task-graph.json", &morphed.to_json()?)?;

    let label_to_taskid = generator.label_to_taskid()?.clone();
    write(
        "label-to-taskid.json",
        &serde_json::to_value(&label_to_taskid)?,
    )?;

    let to_run: Vec<Value> = morphed
        .tasks
        .keys()
        .map(|l| Value::String(l.clone()))
        .collect();
    write("to-run.json", &Value::Array(to_run))?;

    write(
        "optimization-log.json",
        &serde_json::to_value(generator.optimization_log()?)?,
    )?;

    // Submit: one atomic batch, parented to the decision task.
    let mut by_taskid: BTreeMap<String, Value> = BTreeMap::new();
    for task in morphed.tasks.values() {
        let task_id = task
            .task_id
            .clone()
            .ok_or_else(|| anyhow!("task '{}' has no assigned id", task.label))?;
        by_taskid.insert(task_id, task.task_definition.clone());
    }
    client.create_tasks(&by_taskid, &args.decision_id)?;
    info!(tasks = by_taskid.len(), "submitted task graph");

    Ok(())
}
