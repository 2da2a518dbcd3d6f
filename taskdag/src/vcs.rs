// src/vcs.rs

//! Minimal version-control introspection consumed by parameter defaulting
//! and the `skip-unless-changed` strategy.

use crate::errors::{Result, TaskdagError};

pub trait Vcs {
    /// Paths changed between two revisions, relative to the repository
    /// root.
    fn get_files_changed(&self, base_rev: &str, head_rev: &str) -> Result<Vec<String>>;

    fn does_revision_exist_locally(&self, rev: &str) -> Result<bool>;

    /// The most recent revision reachable from both `base_ref` and
    /// `head_rev`.
    fn find_latest_common_revision(&self, base_ref: &str, head_rev: &str) -> Result<String>;

    fn default_branch(&self) -> Result<String>;

    fn remote_name(&self) -> Result<String>;

    /// URL of the default remote.
    fn remote_url(&self) -> Result<String>;

    /// The currently checked-out revision.
    fn head_rev(&self) -> Result<String>;
}

/// A `Vcs` for environments without a repository (tests, artifact replay).
/// Every query answers with an error or an empty value, which parameter
/// defaulting tolerates.
#[derive(Debug, Default, Clone)]
pub struct NullVcs;

impl Vcs for NullVcs {
    fn get_files_changed(&self, _base_rev: &str, _head_rev: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn does_revision_exist_locally(&self, _rev: &str) -> Result<bool> {
        Ok(false)
    }

    fn find_latest_common_revision(&self, _base_ref: &str, _head_rev: &str) -> Result<String> {
        Err(no_repository())
    }

    fn default_branch(&self) -> Result<String> {
        Err(no_repository())
    }

    fn remote_name(&self) -> Result<String> {
        Err(no_repository())
    }

    fn remote_url(&self) -> Result<String> {
        Err(no_repository())
    }

    fn head_rev(&self) -> Result<String> {
        Err(no_repository())
    }
}

fn no_repository() -> TaskdagError {
    TaskdagError::Config("no version control repository available".to_string())
}
