use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;

use serde_json::{json, Value};

use taskdag::config::GraphConfig;
use taskdag::parameters::Parameters;
use taskdag::registry::Registries;
use taskdag::transforms::{chunking, matrix, task_context, TaskStub, TransformConfig};

type TestResult = Result<(), Box<dyn Error>>;

fn graph_config() -> GraphConfig {
    GraphConfig::new(
        json!({
            "trust-domain": "demo",
            "task-priority": "low",
            "workers": {
                "aliases": {
                    "b-linux": {
                        "provisioner": "demo-provisioner",
                        "implementation": "generic-worker",
                        "os": "linux",
                        "worker-type": "demo-b-linux",
                    }
                }
            },
            "taskgraph": {
                "repositories": { "demo": { "name": "Demo" } }
            },
        }),
        PathBuf::from("."),
    )
    .expect("config is valid")
}

fn stub(value: Value) -> TaskStub {
    match value {
        Value::Object(map) => map,
        _ => panic!("stubs are mappings"),
    }
}

fn apply(reference: &str, stubs: Vec<TaskStub>) -> taskdag::Result<Vec<TaskStub>> {
    let registries = Registries::with_builtins();
    let graph_config = graph_config();
    let params = Parameters::new(BTreeMap::new(), &[], false).expect("defaults valid");
    let empty = BTreeMap::new();

    let config = TransformConfig {
        kind: "test".to_string(),
        path: PathBuf::from("."),
        config: json!({}),
        params: &params,
        graph_config: &graph_config,
        kind_dependencies_tasks: &empty,
        registries: &registries,
        write_artifacts: false,
        fast: false,
    };

    registries.transforms(reference)?.apply(&config, stubs)
}

#[test]
fn chunking_duplicates_and_substitutes() -> TestResult {
    let tasks = apply(
        chunking::REFERENCE,
        vec![stub(json!({
            "name": "suite",
            "description": "chunk {this_chunk} of {total_chunks}",
            "chunk": {
                "total-chunks": 3,
                "substitution-fields": ["description"],
            },
        }))],
    )?;

    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0]["description"], json!("chunk 1 of 3"));
    assert_eq!(tasks[2]["description"], json!("chunk 3 of 3"));
    assert_eq!(tasks[1]["attributes"]["this_chunk"], json!(2));
    assert_eq!(tasks[1]["attributes"]["total_chunks"], json!(3));
    Ok(())
}

#[test]
fn chunking_passes_unchunked_tasks_through() -> TestResult {
    let tasks = apply(
        chunking::REFERENCE,
        vec![stub(json!({ "name": "plain" }))],
    )?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["name"], json!("plain"));
    Ok(())
}

#[test]
fn chunking_rejects_zero_chunks() {
    let result = apply(
        chunking::REFERENCE,
        vec![stub(json!({
            "name": "suite",
            "chunk": { "total-chunks": 0 },
        }))],
    );
    assert!(result.is_err());
}

#[test]
fn matrix_produces_cartesian_product() -> TestResult {
    let tasks = apply(
        matrix::REFERENCE,
        vec![stub(json!({
            "name": "task",
            "matrix": {
                "colour": ["brown", "black"],
                "animal": ["dog", "cat"],
            },
        }))],
    )?;

    let names: Vec<&str> = tasks
        .iter()
        .map(|t| t["name"].as_str().expect("name is a string"))
        .collect();
    // Axes expand in declaration order: colour is listed first, so it
    // varies slowest.
    assert_eq!(
        names,
        [
            "task-brown-dog",
            "task-brown-cat",
            "task-black-dog",
            "task-black-cat",
        ]
    );
    assert_eq!(
        tasks[0]["attributes"]["matrix"],
        json!({ "colour": "brown", "animal": "dog" })
    );
    Ok(())
}

#[test]
fn matrix_exclude_drops_partial_matches() -> TestResult {
    let tasks = apply(
        matrix::REFERENCE,
        vec![stub(json!({
            "name": "task",
            "matrix": {
                "exclude": [
                    { "animal": "dog", "colour": "brown" },
                    { "animal": "cat" },
                ],
                "colour": ["brown", "black"],
                "animal": ["dog", "cat"],
            },
        }))],
    )?;

    let names: Vec<&str> = tasks
        .iter()
        .map(|t| t["name"].as_str().expect("name is a string"))
        .collect();
    assert_eq!(names, ["task-black-dog"]);
    Ok(())
}

#[test]
fn task_context_precedence_is_parameters_object_file() -> TestResult {
    // `from-object` supplies both keys; the parameter overrides one.
    let tasks = apply(
        task_context::REFERENCE,
        vec![stub(json!({
            "name": "ctx",
            "description": "{greeting} {project}",
            "task-context": {
                "from-parameters": { "project": "project" },
                "from-object": {
                    "greeting": "hello",
                    "project": "overridden-by-parameters",
                },
                "substitution-fields": ["description"],
            },
        }))],
    )?;

    // The non-strict parameter defaults leave `project` empty.
    assert_eq!(tasks[0]["description"], json!("hello "));
    Ok(())
}

#[test]
fn schema_checkpoints_fail_fast() {
    let result = apply(
        chunking::REFERENCE,
        vec![stub(json!({
            "name": "bad",
            "chunk": { "total-chunks": "three" },
        }))],
    );
    let err = result.unwrap_err();
    assert!(err.to_string().contains("schema validation"));
}

#[test]
fn duplicate_registration_is_fatal() {
    use taskdag::transforms::TransformSequence;

    let mut registries = Registries::with_builtins();
    assert!(registries
        .register_transforms("my-project.transforms:transforms", TransformSequence::new())
        .is_ok());
    let err = registries
        .register_transforms("my-project.transforms:transforms", TransformSequence::new())
        .unwrap_err();
    assert!(err.to_string().contains("already registered"));

    // Built-in names are taken too.
    assert!(registries
        .register_transforms(chunking::REFERENCE, TransformSequence::new())
        .is_err());
}

#[test]
fn from_deps_requires_kind_dependencies() {
    let registries = Registries::with_builtins();
    let graph_config = graph_config();
    let params = Parameters::new(BTreeMap::new(), &[], false).expect("defaults valid");
    let empty = BTreeMap::new();

    let config = TransformConfig {
        kind: "test".to_string(),
        path: PathBuf::from("."),
        config: json!({}),
        params: &params,
        graph_config: &graph_config,
        kind_dependencies_tasks: &empty,
        registries: &registries,
        write_artifacts: false,
        fast: false,
    };

    let result = registries
        .transforms(taskdag::transforms::from_deps::REFERENCE)
        .and_then(|t| {
            t.apply(
                &config,
                vec![stub(json!({
                    "name": "t",
                    "from-deps": {},
                }))],
            )
        });
    assert!(result.is_err());
}
