use std::error::Error;
use std::path::PathBuf;

use taskdag_cli::cli::DecisionArgs;
use taskdag_cli::commands;

type TestResult = Result<(), Box<dyn Error>>;

fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../taskdag/examples/hello-world")
}

#[test]
fn decision_writes_all_artifacts() -> TestResult {
    let output = tempfile::tempdir()?;
    let params = output.path().join("parameters.yml");
    std::fs::write(&params, "target_tasks_method: all\nproject: demo\n")?;

    let args = DecisionArgs {
        root: fixture_root().to_str().expect("utf-8 path").to_string(),
        parameters: Some(params.to_str().expect("utf-8 path").to_string()),
        output_dir: output.path().join("artifacts").to_str().expect("utf-8").to_string(),
        decision_id: "TEST-DECISION".to_string(),
        fast: false,
        no_verify: false,
    };
    commands::decision(&args)?;

    let artifacts = output.path().join("artifacts");
    for name in [
        "parameters.json",
        "full-task-graph.json",
        "target-tasks.json",
        "task-graph.json",
        "label-to-taskid.json",
        "to-run.json",
        "optimization-log.json",
    ] {
        assert!(artifacts.join(name).is_file(), "missing artifact {name}");
    }

    // The task graph artifact is keyed by label and deterministic.
    let graph: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifacts.join("task-graph.json"))?)?;
    let labels: Vec<&String> = graph.as_object().expect("mapping").keys().collect();
    assert_eq!(labels, ["hello-a", "hello-b"]);

    let to_run: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(artifacts.join("to-run.json"))?)?;
    assert_eq!(to_run.as_array().expect("list").len(), 2);
    Ok(())
}
