// src/util/attributes.rs

//! Attribute matching helpers used by target selection and `from-deps`.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::errors::{Result, TaskdagError};

/// Match a task's attributes against a set of conditions.
///
/// Each condition either equals the attribute value exactly, or — when the
/// condition is a list — is satisfied by membership. Every condition must
/// hold, and a condition on an absent attribute fails.
pub fn attrmatch(attributes: &BTreeMap<String, Value>, conditions: &Value) -> bool {
    let Some(conditions) = conditions.as_object() else {
        return false;
    };
    conditions.iter().all(|(key, condition)| {
        let Some(value) = attributes.get(key) else {
            return false;
        };
        match condition {
            Value::Array(choices) => choices.iter().any(|c| c == value),
            other => other == value,
        }
    })
}

/// Whether a task opted into the given project.
///
/// `run_on_projects` supports the `all` keyword plus literal project names.
pub fn match_run_on_projects(project: &str, run_on_projects: &[String]) -> bool {
    run_on_projects
        .iter()
        .any(|p| p == "all" || p == project)
}

/// Whether a task opted into the given git branch; entries are anchored
/// regexes, and `all` matches everything.
pub fn match_run_on_git_branches(git_branch: &str, run_on_git_branches: &[String]) -> Result<bool> {
    // Branch parameters arrive fully qualified.
    let git_branch = git_branch
        .strip_prefix("refs/heads/")
        .unwrap_or(git_branch);

    for pattern in run_on_git_branches {
        if pattern == "all" {
            return Ok(true);
        }
        let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            TaskdagError::Config(format!("invalid run-on-git-branches pattern {pattern:?}: {e}"))
        })?;
        if re.is_match(git_branch) {
            return Ok(true);
        }
    }
    Ok(false)
}
