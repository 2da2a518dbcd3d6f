// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `taskdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskdag",
    version,
    about = "Generate, optimize and submit DAGs of CI tasks.",
    long_about = None
)]
pub struct Cli {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Show the full task graph.
    Full(ShowArgs),
    /// Show the target task set.
    Target(ShowArgs),
    /// Show the target task graph (target set plus dependencies).
    TargetGraph(ShowArgs),
    /// Show the optimized task graph.
    Optimized(ShowArgs),
    /// Show the morphed task graph.
    Morphed(ShowArgs),
    /// Run the full decision flow: generate, persist artifacts, submit.
    Decision(DecisionArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ShowArgs {
    /// Root of the graph configuration (the directory holding config.yml).
    #[arg(long, short = 'r', value_name = "DIR", default_value = "ci")]
    pub root: String,

    /// Parameters: a file path, `task-id=<id>`, `project=<name>` or
    /// `index=<path>`. May be given several times; each set is generated
    /// in its own worker.
    #[arg(long = "parameters", short = 'p', value_name = "SPEC")]
    pub parameters: Vec<String>,

    /// Only generate the given kinds (and their kind-dependencies).
    #[arg(long = "target-kind", value_name = "KIND")]
    pub target_kind: Vec<String>,

    /// Only show tasks with labels matching this regular expression.
    #[arg(long = "tasks", alias = "tasks-regex", value_name = "REGEX")]
    pub tasks: Option<String>,

    /// Output the graph as a JSON object instead of labels.
    #[arg(long, short = 'J')]
    pub json: bool,

    /// Omit this dotted key path from the JSON output; repeatable.
    #[arg(long = "exclude-key", value_name = "PATH")]
    pub exclude_keys: Vec<String>,

    /// Generate against another revision and show the difference.
    #[arg(long, value_name = "REVSPEC", num_args = 0..=1, default_missing_value = "HEAD")]
    pub diff: Option<String>,

    /// Enable fast generation: skip schema validation checkpoints.
    #[arg(long, short = 'F')]
    pub fast: bool,

    /// Skip the per-phase verifications.
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DecisionArgs {
    /// Root of the graph configuration (the directory holding config.yml).
    #[arg(long, short = 'r', value_name = "DIR", default_value = "ci")]
    pub root: String,

    /// Parameters for this decision.
    #[arg(long = "parameters", short = 'p', value_name = "SPEC")]
    pub parameters: Option<String>,

    /// Directory the decision artifacts are written to.
    #[arg(long, value_name = "DIR", default_value = "artifacts")]
    pub output_dir: String,

    /// Id of the decision task the submitted graph is parented to.
    #[arg(long, value_name = "TASK-ID", default_value = "DECISION-TASK")]
    pub decision_id: String,

    /// Enable fast generation: skip schema validation checkpoints.
    #[arg(long, short = 'F')]
    pub fast: bool,

    /// Skip the per-phase verifications.
    #[arg(long)]
    pub no_verify: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `Cli::parse()`.
pub fn parse() -> Cli {
    Cli::parse()
}
