use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use taskdag::generator::{GeneratorSettings, ParametersInput, TaskGraphGenerator};
use taskdag::parameters::Parameters;
use taskdag::platform::{StaticPlatformClient, TaskStatus};
use taskdag::vcs::NullVcs;
use taskdag::TaskdagError;

type TestResult = Result<(), Box<dyn Error>>;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("examples")
        .join(name)
}

fn params(target_tasks_method: &str) -> Parameters {
    let mut values = BTreeMap::new();
    values.insert("target_tasks_method".to_string(), json!(target_tasks_method));
    values.insert("project".to_string(), json!("demo"));
    values.insert("head_repository".to_string(), json!("https://example.com/demo"));
    values.insert("head_rev".to_string(), json!("abcdef123456"));
    Parameters::new(values, &[], false).expect("fixture parameters are valid")
}

fn generator(fixture_name: &str, client: StaticPlatformClient, method: &str) -> TaskGraphGenerator {
    TaskGraphGenerator::new(
        fixture(fixture_name),
        ParametersInput::Ready(params(method)),
        Arc::new(client),
        Arc::new(NullVcs),
        GeneratorSettings::default(),
        None,
    )
    .expect("fixture config loads")
}

#[test]
fn hello_world_flows_through_all_phases() -> TestResult {
    let mut gen = generator("hello-world", StaticPlatformClient::default(), "all");

    let full: BTreeSet<String> = gen.full_task_graph()?.tasks.keys().cloned().collect();
    assert_eq!(full, ["hello-a", "hello-b"].map(String::from).into());

    let b = &gen.full_task_graph()?.tasks["hello-b"];
    assert_eq!(b.dependencies["edge1"], "hello-a");
    assert_eq!(b.kind, "hello");
    // The wire format got the alias resolved and the priority applied.
    assert_eq!(b.task_definition["workerType"], json!("demo-b-linux"));
    assert_eq!(b.task_definition["provisionerId"], json!("demo-provisioner"));
    assert_eq!(b.task_definition["priority"], json!("low"));

    let target: BTreeSet<String> = gen.target_task_graph()?.tasks.keys().cloned().collect();
    assert_eq!(target, full);

    let optimized: BTreeSet<String> = gen.optimized_task_graph()?.tasks.keys().cloned().collect();
    assert_eq!(optimized, full);

    // The morphed wire format is parented to the decision task.
    let morphed = gen.morphed_task_graph()?;
    for task in morphed.tasks.values() {
        assert_eq!(task.task_definition["taskGroupId"], json!("DECISION-TASK"));
        assert!(task.task_id.is_some());
    }

    // The optimizer rewrote the wire dependencies to real ids.
    let label_to_taskid = gen.label_to_taskid()?;
    let a_id = label_to_taskid["hello-a"].clone();
    let morphed = gen.morphed_task_graph()?;
    let b_def = &morphed.tasks["hello-b"].task_definition;
    assert_eq!(b_def["dependencies"], json!([a_id]));
    Ok(())
}

#[test]
fn index_hit_substitutes_previously_computed_task() -> TestResult {
    // Scenario: hello-a advertises an index path the platform already has.
    let client = StaticPlatformClient::new(
        [("foo.bar.baz".to_string(), "TASKID-A".to_string())].into(),
        [(
            "TASKID-A".to_string(),
            TaskStatus {
                state: "completed".to_string(),
                expires: "2099-01-01T00:00:00.000Z".to_string(),
            },
        )]
        .into(),
    );
    let mut gen = generator("hello-cached", client, "all");

    let optimized = gen.optimized_task_graph()?;
    let labels: BTreeSet<String> = optimized.tasks.keys().cloned().collect();
    assert_eq!(labels, ["hello-b".to_string()].into());
    assert_eq!(optimized.tasks["hello-b"].dependencies["edge1"], "TASKID-A");
    Ok(())
}

#[test]
fn expired_index_hit_is_ignored() -> TestResult {
    let client = StaticPlatformClient::new(
        [("foo.bar.baz".to_string(), "TASKID-A".to_string())].into(),
        [(
            "TASKID-A".to_string(),
            TaskStatus {
                state: "completed".to_string(),
                // Long expired; hello-b's deadline cannot be met.
                expires: "2001-01-01T00:00:00.000Z".to_string(),
            },
        )]
        .into(),
    );
    let mut gen = generator("hello-cached", client, "all");

    let labels: BTreeSet<String> =
        gen.optimized_task_graph()?.tasks.keys().cloned().collect();
    assert_eq!(labels, ["hello-a", "hello-b"].map(String::from).into());
    Ok(())
}

#[test]
fn from_deps_fans_out_per_attribute_group() -> TestResult {
    let mut gen = generator("fan-out", StaticPlatformClient::default(), "all");

    let full = gen.full_task_graph()?;
    let labels: BTreeSet<String> = full.tasks.keys().cloned().collect();
    assert_eq!(
        labels,
        ["build-linux", "build-mac", "test-linux", "test-mac"]
            .map(String::from)
            .into()
    );

    assert_eq!(full.tasks["test-linux"].dependencies["build"], "build-linux");
    assert_eq!(full.tasks["test-mac"].dependencies["build"], "build-mac");
    assert_eq!(
        full.tasks["test-linux"].attributes["primary-kind-dependency"],
        json!("build")
    );
    Ok(())
}

#[test]
fn matrix_expands_axes_minus_exclusions() -> TestResult {
    let mut gen = generator("matrix", StaticPlatformClient::default(), "all");

    let labels: BTreeSet<String> = gen.full_task_graph()?.tasks.keys().cloned().collect();
    assert_eq!(labels, ["test-linux", "test-mac"].map(String::from).into());

    let linux = &gen.full_task_graph()?.tasks["test-linux"];
    assert_eq!(linux.attributes["matrix"], json!({ "os": "linux" }));
    assert_eq!(linux.description.as_deref(), Some("test on linux"));
    Ok(())
}

#[test]
fn dependency_cycles_fail_generation() {
    let mut gen = generator("cycle", StaticPlatformClient::default(), "all");
    let err = gen.full_task_graph().unwrap_err();
    assert!(matches!(err, TaskdagError::Dependency(_)));
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn unknown_target_kind_fails_generation() {
    let mut values = BTreeMap::new();
    values.insert("target_tasks_method".to_string(), json!("all"));
    values.insert("target-kinds".to_string(), json!(["no-such-kind"]));
    let params = Parameters::new(values, &[], false).expect("valid");

    let mut gen = TaskGraphGenerator::new(
        fixture("hello-world"),
        ParametersInput::Ready(params),
        Arc::new(StaticPlatformClient::default()),
        Arc::new(NullVcs),
        GeneratorSettings::default(),
        None,
    )
    .expect("fixture config loads");

    assert!(gen.full_task_set().is_err());
}

#[test]
fn target_kinds_limit_generation() -> TestResult {
    let mut values = BTreeMap::new();
    values.insert("target_tasks_method".to_string(), json!("all"));
    values.insert("project".to_string(), json!("demo"));
    values.insert("head_repository".to_string(), json!("https://example.com/demo"));
    values.insert("head_rev".to_string(), json!("abcdef123456"));
    values.insert("target-kinds".to_string(), json!(["build"]));
    let params = Parameters::new(values, &[], false)?;

    let mut gen = TaskGraphGenerator::new(
        fixture("fan-out"),
        ParametersInput::Ready(params),
        Arc::new(StaticPlatformClient::default()),
        Arc::new(NullVcs),
        GeneratorSettings::default(),
        None,
    )?;

    let labels: BTreeSet<String> = gen.full_task_graph()?.tasks.keys().cloned().collect();
    assert_eq!(labels, ["build-linux", "build-mac"].map(String::from).into());
    Ok(())
}
