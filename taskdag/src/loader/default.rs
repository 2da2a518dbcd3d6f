// src/loader/default.rs

//! The default loader: the transform loader plus the standard pipeline
//! bookends. Most kinds want their `run:` stanza translated and their
//! high-level definition lowered to wire format, so those two transforms
//! are injected unless the kind already references them.

use crate::errors::Result;
use crate::kind::Kind;
use crate::transforms::TransformConfig;

use super::{transform, LoadedKind};

const RUN_TRANSFORMS: &str = "taskdag.transforms.run:transforms";
const TASK_TRANSFORMS: &str = "taskdag.transforms.task:transforms";

pub fn loader(kind: &Kind, config: &TransformConfig) -> Result<LoadedKind> {
    let mut references = kind.transform_references();
    if !references.iter().any(|r| r == RUN_TRANSFORMS) {
        references.insert(0, RUN_TRANSFORMS.to_string());
    }
    if !references.iter().any(|r| r == TASK_TRANSFORMS) {
        references.push(TASK_TRANSFORMS.to_string());
    }

    Ok(LoadedKind {
        stubs: transform::load_stubs(kind, config)?,
        transform_references: references,
    })
}
