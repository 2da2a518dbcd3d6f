// src/optimize/strategies.rs

//! Built-in optimization strategies and the composite combinators.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSetBuilder};
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, TaskdagError};
use crate::parameters::Parameters;
use crate::registry::Registries;
use crate::task::Task;
use crate::util::time::parse_time;

use super::{OptimizationStrategy, Replacement, ReplacementContext};

pub fn register_builtins(registries: &mut Registries) -> Result<()> {
    registries.register_strategy("never", Arc::new(Never))?;
    registries.register_strategy("always", Arc::new(Always))?;
    registries.register_strategy("index-search", Arc::new(IndexSearch))?;
    registries.register_strategy("skip-unless-changed", Arc::new(SkipUnlessChanged))?;
    Ok(())
}

/// The do-nothing strategy: never removes, never replaces.
pub struct Never;

impl OptimizationStrategy for Never {}

/// Unconditional removal; the building block for composites and tests.
pub struct Always;

impl OptimizationStrategy for Always {
    fn should_remove_task(&self, _task: &Task, _params: &Parameters, _arg: &Value) -> Result<bool> {
        Ok(true)
    }
}

/// Replace the task with a previously indexed one.
///
/// The argument is an ordered list of index paths; the first one that
/// resolves to a healthy task whose expiration covers every dependent's
/// deadline wins. A task is left to run when the artifacts expired, the
/// indexed task failed, or nothing is indexed yet.
pub struct IndexSearch;

impl OptimizationStrategy for IndexSearch {
    fn should_replace_task(
        &self,
        task: &Task,
        _params: &Parameters,
        deadline: Option<&DateTime<Utc>>,
        arg: &Value,
        ctx: &ReplacementContext,
    ) -> Result<Replacement> {
        for index_path in index_paths(arg) {
            let Some(task_id) = ctx.index_to_taskid.get(&index_path) else {
                continue;
            };
            let Some(status) = ctx.taskid_to_status.get(task_id) else {
                debug!(task = %task.label, %task_id, "no status for indexed task");
                continue;
            };
            if status.state == "exception" || status.state == "failed" {
                continue;
            }
            if let Some(deadline) = deadline {
                let expires = parse_time(&status.expires)?;
                if expires < *deadline {
                    continue;
                }
            }
            return Ok(Replacement::With(task_id.clone()));
        }
        Ok(Replacement::No)
    }

    fn gather_index_paths(&self, arg: &Value, out: &mut BTreeSet<String>) {
        out.extend(index_paths(arg));
    }
}

fn index_paths(arg: &Value) -> Vec<String> {
    arg.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Remove the task unless one of the changed files matches one of the
/// argument's glob patterns.
pub struct SkipUnlessChanged;

impl OptimizationStrategy for SkipUnlessChanged {
    fn should_remove_task(&self, task: &Task, params: &Parameters, arg: &Value) -> Result<bool> {
        let patterns: Vec<&str> = arg
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                TaskdagError::Optimizer(format!(
                    "invalid skip-unless-changed pattern {pattern:?}: {e}"
                ))
            })?;
            builder.add(glob);
        }
        let globs = builder
            .build()
            .map_err(|e| TaskdagError::Optimizer(e.to_string()))?;

        let files_changed = params.files_changed()?;
        let changed = files_changed.iter().any(|path| globs.is_match(path));
        if !changed {
            debug!(task = %task.label, "no changed file matches skip-unless-changed");
            return Ok(true);
        }
        Ok(false)
    }
}

/// Composite: remove/replace only when *every* sub-strategy agrees.
pub struct All(pub Vec<Arc<dyn OptimizationStrategy>>);

impl OptimizationStrategy for All {
    fn should_remove_task(&self, task: &Task, params: &Parameters, arg: &Value) -> Result<bool> {
        for strategy in &self.0 {
            if !strategy.should_remove_task(task, params, arg)? {
                return Ok(false);
            }
        }
        Ok(!self.0.is_empty())
    }

    fn should_replace_task(
        &self,
        task: &Task,
        params: &Parameters,
        deadline: Option<&DateTime<Utc>>,
        arg: &Value,
        ctx: &ReplacementContext,
    ) -> Result<Replacement> {
        let mut answer = Replacement::No;
        for strategy in &self.0 {
            match strategy.should_replace_task(task, params, deadline, arg, ctx)? {
                Replacement::No => return Ok(Replacement::No),
                replacement => answer = replacement,
            }
        }
        Ok(answer)
    }

    fn gather_index_paths(&self, arg: &Value, out: &mut BTreeSet<String>) {
        for strategy in &self.0 {
            strategy.gather_index_paths(arg, out);
        }
    }
}

/// Composite: remove/replace when *any* sub-strategy says so.
pub struct Any(pub Vec<Arc<dyn OptimizationStrategy>>);

impl OptimizationStrategy for Any {
    fn should_remove_task(&self, task: &Task, params: &Parameters, arg: &Value) -> Result<bool> {
        for strategy in &self.0 {
            if strategy.should_remove_task(task, params, arg)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn should_replace_task(
        &self,
        task: &Task,
        params: &Parameters,
        deadline: Option<&DateTime<Utc>>,
        arg: &Value,
        ctx: &ReplacementContext,
    ) -> Result<Replacement> {
        for strategy in &self.0 {
            match strategy.should_replace_task(task, params, deadline, arg, ctx)? {
                Replacement::No => continue,
                replacement => return Ok(replacement),
            }
        }
        Ok(Replacement::No)
    }

    fn gather_index_paths(&self, arg: &Value, out: &mut BTreeSet<String>) {
        for strategy in &self.0 {
            strategy.gather_index_paths(arg, out);
        }
    }
}

/// Composite: invert a sub-strategy's removal answer. Replacement is not
/// meaningfully invertible and always declines.
pub struct Not(pub Arc<dyn OptimizationStrategy>);

impl OptimizationStrategy for Not {
    fn should_remove_task(&self, task: &Task, params: &Parameters, arg: &Value) -> Result<bool> {
        Ok(!self.0.should_remove_task(task, params, arg)?)
    }
}

/// A named alias for an existing strategy, so projects can expose a stable
/// name while swapping implementations.
pub struct Alias(pub Arc<dyn OptimizationStrategy>);

impl OptimizationStrategy for Alias {
    fn should_remove_task(&self, task: &Task, params: &Parameters, arg: &Value) -> Result<bool> {
        self.0.should_remove_task(task, params, arg)
    }

    fn should_replace_task(
        &self,
        task: &Task,
        params: &Parameters,
        deadline: Option<&DateTime<Utc>>,
        arg: &Value,
        ctx: &ReplacementContext,
    ) -> Result<Replacement> {
        self.0.should_replace_task(task, params, deadline, arg, ctx)
    }

    fn gather_index_paths(&self, arg: &Value, out: &mut BTreeSet<String>) {
        self.0.gather_index_paths(arg, out);
    }
}
