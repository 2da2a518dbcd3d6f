use std::collections::BTreeMap;
use std::error::Error;
use std::io::Write;

use serde_json::json;

use taskdag::parameters::{load_parameters, Parameters, ParametersExtension, PARAMETERS_ARTIFACT};
use taskdag::platform::StaticPlatformClient;
use taskdag::util::schema::{required, Schema};
use taskdag::vcs::NullVcs;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn strict_mode_requires_every_core_parameter() {
    let err = Parameters::new(BTreeMap::new(), &[], true).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("parameter error"));
    assert!(message.contains("missing required key"));
}

#[test]
fn non_strict_mode_fills_defaults() -> TestResult {
    let params = Parameters::new(BTreeMap::new(), &[], false)?;
    assert_eq!(params.str("level")?, "1");
    assert!(params.bool("optimize_target_tasks")?);
    assert_eq!(params.files_changed()?, Vec::<String>::new());
    Ok(())
}

#[test]
fn ill_typed_parameters_are_rejected() {
    let mut values = BTreeMap::new();
    values.insert("level".to_string(), json!(3));
    let err = Parameters::new(values, &[], false).unwrap_err();
    assert!(err.to_string().contains("level"));
}

#[test]
fn unknown_keys_fail_in_strict_mode_only() -> TestResult {
    let mut values = BTreeMap::new();
    values.insert("my-custom-key".to_string(), json!("x"));
    assert!(Parameters::new(values.clone(), &[], false).is_ok());

    // Strict mode rejects the same key...
    let strict_values: BTreeMap<_, _> = Parameters::new(values.clone(), &[], false)?
        .as_map()
        .clone();
    let err = Parameters::new(strict_values.clone(), &[], true).unwrap_err();
    assert!(err.to_string().contains("my-custom-key"));

    // ...unless an extension declares it.
    let extension = ParametersExtension {
        fields: vec![required("my-custom-key", Schema::Str)],
        defaults: BTreeMap::new(),
    };
    assert!(Parameters::new(strict_values, &[extension], true).is_ok());
    Ok(())
}

#[test]
fn extension_defaults_apply() -> TestResult {
    let extension = ParametersExtension {
        fields: vec![required("release-type", Schema::Str)],
        defaults: [("release-type".to_string(), json!("nightly"))].into(),
    };
    let params = Parameters::new(BTreeMap::new(), &[extension], false)?;
    assert_eq!(params.str("release-type")?, "nightly");
    Ok(())
}

#[test]
fn parameters_load_from_yaml_file() -> TestResult {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile()?;
    writeln!(file, "project: demo\nlevel: \"3\"")?;

    let params = load_parameters(
        Some(file.path().to_str().expect("utf-8 path")),
        false,
        &BTreeMap::new(),
        &[],
        None,
        &StaticPlatformClient::default(),
        &NullVcs,
    )?;
    assert_eq!(params.str("project")?, "demo");
    assert_eq!(params.str("level")?, "3");
    Ok(())
}

#[test]
fn parameters_load_from_json_file_with_overrides() -> TestResult {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile()?;
    write!(file, "{}", json!({ "project": "demo", "owner": "a@b.c" }))?;

    let mut overrides = BTreeMap::new();
    overrides.insert("owner".to_string(), json!("override@b.c"));

    let params = load_parameters(
        Some(file.path().to_str().expect("utf-8 path")),
        false,
        &overrides,
        &[],
        None,
        &StaticPlatformClient::default(),
        &NullVcs,
    )?;
    assert_eq!(params.str("owner")?, "override@b.c");
    Ok(())
}

#[test]
fn parameters_resolve_from_decision_task_artifact() -> TestResult {
    let client = StaticPlatformClient::new(
        [(
            "demo.v2.myproject.latest.taskgraph.decision".to_string(),
            "DEC-ID".to_string(),
        )]
        .into(),
        BTreeMap::new(),
    )
    .with_artifact("DEC-ID", PARAMETERS_ARTIFACT, b"project: myproject\n");

    let params = load_parameters(
        Some("project=myproject"),
        false,
        &BTreeMap::new(),
        &[],
        Some("demo"),
        &client,
        &NullVcs,
    )?;
    assert_eq!(params.str("project")?, "myproject");

    let params = load_parameters(
        Some("task-id=DEC-ID"),
        false,
        &BTreeMap::new(),
        &[],
        Some("demo"),
        &client,
        &NullVcs,
    )?;
    assert_eq!(params.str("project")?, "myproject");
    Ok(())
}

#[test]
fn unsupported_parameter_files_are_rejected() {
    let err = load_parameters(
        Some("parameters.toml"),
        false,
        &BTreeMap::new(),
        &[],
        None,
        &StaticPlatformClient::default(),
        &NullVcs,
    )
    .unwrap_err();
    assert!(err.to_string().contains("not YAML or JSON"));
}
