// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Every failure mode of graph generation maps onto one variant here, so
//! callers (most importantly the CLI) can rely on the message prefix to tell
//! configuration mistakes apart from infrastructure failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskdagError {
    /// Missing or malformed `config.yml` / `kind.yml`, or a bad registration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A value failed validation at a schema checkpoint.
    ///
    /// `descriptor` names the offending object (usually a task label or a
    /// dotted field path) so the report is actionable without a stack trace.
    #[error("schema validation of {descriptor} failed: {message}")]
    Schema { descriptor: String, message: String },

    /// Unknown loader reference, broken `tasks-from` path, duplicate task
    /// name within a kind.
    #[error("loader error in kind '{kind}': {message}")]
    Loader { kind: String, message: String },

    /// A transform failed; wrapped with kind (and task, when known) context.
    #[error("transform error in kind '{kind}'{}: {message}", label_suffix(.label))]
    Transform {
        kind: String,
        label: Option<String>,
        message: String,
    },

    /// Unresolved or cyclic dependency.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// The optimizer itself failed. A strategy raising is downgraded to
    /// "cannot optimize" and logged instead; see the `optimize` module.
    #[error("optimizer error: {0}")]
    Optimizer(String),

    /// Network or API failure talking to the execution platform, after the
    /// retry policy has been exhausted.
    #[error("platform error: {0}")]
    Platform(String),

    /// Missing or ill-typed parameter.
    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn label_suffix(label: &Option<String>) -> String {
    match label {
        Some(l) => format!(", task '{l}'"),
        None => String::new(),
    }
}

impl TaskdagError {
    /// Attach a task label to a `Transform` error that was raised before the
    /// label was known. Other variants pass through unchanged.
    pub fn with_label(self, new_label: &str) -> Self {
        match self {
            TaskdagError::Transform {
                kind,
                label: None,
                message,
            } => TaskdagError::Transform {
                kind,
                label: Some(new_label.to_string()),
                message,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, TaskdagError>;
