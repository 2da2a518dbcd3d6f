// src/transforms/chunking.rs

//! Split one task into `total-chunks` tasks, substituting `{this_chunk}`
//! and `{total_chunks}` into the designated fields.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::errors::Result;
use crate::registry::Registries;
use crate::util::schema::{map, open_map, optional, required, seq, Schema};
use crate::util::templates::substitute_task_fields;

use super::{transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.chunking:transforms";

pub fn register(registries: &mut Registries) -> Result<()> {
    let mut transforms = TransformSequence::new();
    transforms.add_validate(chunk_schema());
    transforms.add(chunk_tasks);
    registries.register_transforms(REFERENCE, transforms)
}

fn chunk_schema() -> Schema {
    open_map(vec![optional(
        "chunk",
        map(vec![
            required("total-chunks", Schema::Int),
            optional("substitution-fields", seq(Schema::Str)),
        ]),
    )])
}

fn chunk_tasks(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let mut out = Vec::new();

    for mut task in tasks {
        let Some(chunk_config) = task.remove("chunk") else {
            out.push(task);
            continue;
        };

        let total_chunks = chunk_config
            .get("total-chunks")
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                transform_error(config, &task, "total-chunks must be a positive integer".into())
            })?;

        let fields: Vec<String> = chunk_config
            .get("substitution-fields")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        for this_chunk in 1..=total_chunks {
            let mut subtask = task.clone();

            let attributes = subtask
                .entry("attributes".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(attributes) = attributes.as_object_mut() {
                attributes.insert("this_chunk".to_string(), json!(this_chunk));
                attributes.insert("total_chunks".to_string(), json!(total_chunks));
            }

            let context: BTreeMap<String, Value> = [
                ("this_chunk".to_string(), json!(this_chunk)),
                ("total_chunks".to_string(), json!(total_chunks)),
            ]
            .into();

            let mut as_value = Value::Object(subtask);
            substitute_task_fields(&mut as_value, &fields, &context)?;
            let Value::Object(subtask) = as_value else { unreachable!() };
            out.push(subtask);
        }
    }

    Ok(out)
}
