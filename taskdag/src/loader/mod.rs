// src/loader/mod.rs

//! Kind loaders: how raw task stubs are produced from a kind's
//! configuration before the transform pipeline runs.

pub mod default;
pub mod transform;

use crate::errors::Result;
use crate::registry::Registries;
use crate::transforms::TaskStub;

/// What a loader hands back to the generator: the raw stubs plus the
/// transform references to run them through (loaders may adjust the
/// reference list, which is how the default loader injects the `run` and
/// `task` transforms).
#[derive(Debug, Clone)]
pub struct LoadedKind {
    pub stubs: Vec<TaskStub>,
    pub transform_references: Vec<String>,
}

pub fn register_builtins(registries: &mut Registries) -> Result<()> {
    registries.register_loader("taskdag.loader.transform:loader", transform::loader)?;
    registries.register_loader("taskdag.loader.default:loader", default::loader)?;
    Ok(())
}
