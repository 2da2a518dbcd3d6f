use clap::Parser;

use taskdag_cli::cli::{Cli, Command};

#[test]
fn subcommands_map_to_phases() {
    for (name, check) in [
        ("full", true),
        ("target", true),
        ("target-graph", true),
        ("optimized", true),
        ("morphed", true),
    ] {
        let cli = Cli::try_parse_from(["taskdag", name]);
        assert_eq!(cli.is_ok(), check, "subcommand {name}");
    }
}

#[test]
fn parameters_flag_is_repeatable() {
    let cli = Cli::try_parse_from([
        "taskdag",
        "full",
        "-p",
        "params-main.yml",
        "-p",
        "task-id=abc123",
    ])
    .expect("valid invocation");

    match cli.command {
        Command::Full(show) => {
            assert_eq!(show.parameters, vec!["params-main.yml", "task-id=abc123"]);
        }
        _ => panic!("expected the full subcommand"),
    }
}

#[test]
fn show_flags_parse() {
    let cli = Cli::try_parse_from([
        "taskdag",
        "optimized",
        "--root",
        "ci",
        "--target-kind",
        "build",
        "--target-kind",
        "test",
        "--tasks",
        "^build-",
        "--json",
        "--exclude-key",
        "task.payload.env",
        "--fast",
        "--no-verify",
    ])
    .expect("valid invocation");

    match cli.command {
        Command::Optimized(show) => {
            assert_eq!(show.target_kind, vec!["build", "test"]);
            assert_eq!(show.tasks.as_deref(), Some("^build-"));
            assert!(show.json);
            assert_eq!(show.exclude_keys, vec!["task.payload.env"]);
            assert!(show.fast);
            assert!(show.no_verify);
        }
        _ => panic!("expected the optimized subcommand"),
    }
}

#[test]
fn diff_takes_an_optional_revspec() {
    let cli = Cli::try_parse_from(["taskdag", "full", "--diff"]).expect("valid");
    match cli.command {
        Command::Full(show) => assert_eq!(show.diff.as_deref(), Some("HEAD")),
        _ => panic!("expected the full subcommand"),
    }

    let cli = Cli::try_parse_from(["taskdag", "full", "--diff", "main"]).expect("valid");
    match cli.command {
        Command::Full(show) => assert_eq!(show.diff.as_deref(), Some("main")),
        _ => panic!("expected the full subcommand"),
    }
}

#[test]
fn decision_defaults() {
    let cli = Cli::try_parse_from(["taskdag", "decision"]).expect("valid");
    match cli.command {
        Command::Decision(decision) => {
            assert_eq!(decision.root, "ci");
            assert_eq!(decision.output_dir, "artifacts");
            assert_eq!(decision.decision_id, "DECISION-TASK");
        }
        _ => panic!("expected the decision subcommand"),
    }
}

#[test]
fn unknown_flags_are_usage_errors() {
    assert!(Cli::try_parse_from(["taskdag", "full", "--frobnicate"]).is_err());
    assert!(Cli::try_parse_from(["taskdag"]).is_err());
}
