// src/kind.rs

//! A kind: a named group of tasks with its own loader, transform pipeline
//! and dependencies on other kinds.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, TaskdagError};
use crate::util::schema::{map_of, open_map, optional, seq, Schema};
use crate::util::yaml::load_yaml;

pub const KIND_FILE: &str = "kind.yml";

/// A kind as loaded from `kinds/<name>/kind.yml`. Immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct Kind {
    pub name: String,
    /// The kind's configuration directory.
    pub path: PathBuf,
    /// Raw `kind.yml` contents.
    pub config: Value,
}

impl Kind {
    /// Load one kind by name from the kinds directory. Returns `Ok(None)`
    /// when the directory has no `kind.yml` (stray directories are
    /// tolerated, matching the enumeration behavior of [`load_kinds`]).
    pub fn load(kinds_dir: &Path, name: &str) -> Result<Option<Kind>> {
        let path = kinds_dir.join(name);
        let kind_yml = path.join(KIND_FILE);
        if !kind_yml.is_file() {
            return Ok(None);
        }

        debug!(kind = name, path = %kind_yml.display(), "loading kind");
        let config = load_yaml(&kind_yml)?;
        kind_schema()
            .validate(&config, &format!("kind.yml for kind '{name}'"))?;

        Ok(Some(Kind {
            name: name.to_string(),
            path,
            config,
        }))
    }

    /// The loader reference, `<module>:<object>`; the default loader when
    /// unspecified.
    pub fn loader_reference(&self) -> &str {
        self.config
            .get("loader")
            .and_then(|v| v.as_str())
            .unwrap_or("taskdag.loader.default:loader")
    }

    /// Ordered transform references. A bare `<module>` reference means that
    /// module's `transforms` object.
    pub fn transform_references(&self) -> Vec<String> {
        self.config
            .get("transforms")
            .and_then(|v| v.as_array())
            .map(|refs| {
                refs.iter()
                    .filter_map(|v| v.as_str())
                    .map(|r| {
                        if r.contains(':') {
                            r.to_string()
                        } else {
                            format!("{r}:transforms")
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of kinds whose tasks must be loaded before this one.
    pub fn kind_dependencies(&self) -> Vec<String> {
        self.config
            .get("kind-dependencies")
            .and_then(|v| v.as_array())
            .map(|deps| {
                deps.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Enumerate every kind directory under `kinds_dir`.
pub fn load_kinds(kinds_dir: &Path) -> Result<Vec<Kind>> {
    if !kinds_dir.is_dir() {
        return Err(TaskdagError::Config(format!(
            "kinds directory not found: {}",
            kinds_dir.display()
        )));
    }

    let mut kinds = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(kinds_dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    for entry in entries {
        let name = entry
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TaskdagError::Config(format!("non-UTF-8 kind directory: {}", entry.display()))
            })?;
        if let Some(kind) = Kind::load(kinds_dir, name)? {
            kinds.push(kind);
        }
    }

    Ok(kinds)
}

fn kind_schema() -> Schema {
    open_map(vec![
        optional("loader", Schema::Str),
        optional("transforms", seq(Schema::Str)),
        optional("kind-dependencies", seq(Schema::Str)),
        optional("task-defaults", map_of(Schema::Any)),
        optional("tasks", map_of(map_of(Schema::Any))),
        optional("tasks-from", seq(Schema::Str)),
    ])
}
