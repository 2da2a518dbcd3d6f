// src/transforms/task_context.rs

//! Substitute values that are only known at generation time into task
//! fields, from parameters, an inline object, and/or a YAML file.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::Result;
use crate::registry::Registries;
use crate::util::schema::{self, any_of, map_of, open_map, optional, required, seq, Schema};
use crate::util::templates::{resolve_dotted_path, substitute_task_fields};
use crate::util::yaml::load_yaml;

use super::{transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.task_context:transforms";

pub fn register(registries: &mut Registries) -> Result<()> {
    let mut transforms = TransformSequence::new();
    transforms.add_validate(context_schema());
    transforms.add(render_task);
    registries.register_transforms(REFERENCE, transforms)
}

fn context_schema() -> Schema {
    open_map(vec![optional(
        "task-context",
        schema::map(vec![
            required("substitution-fields", seq(Schema::Str)),
            // A single parameter, or a list tried in priority order (which
            // is how a "default" source is expressed).
            optional(
                "from-parameters",
                map_of(any_of(vec![Schema::Str, seq(Schema::Str)])),
            ),
            optional("from-file", Schema::Str),
            optional("from-object", map_of(Schema::Any)),
        ]),
    )])
}

fn render_task(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let params_json = config.params.to_json();
    let mut out = Vec::with_capacity(tasks.len());

    for mut task in tasks {
        let Some(sub_config) = task.remove("task-context") else {
            out.push(task);
            continue;
        };

        // Precedence, lowest first: file, inline object, parameters.
        let mut context: BTreeMap<String, Value> = BTreeMap::new();

        if let Some(from_file) = sub_config.get("from-file").and_then(|v| v.as_str()) {
            let file = load_yaml(config.path.join(from_file)).map_err(|e| {
                transform_error(config, &task, format!("task-context from-file: {e}"))
            })?;
            if let Some(map) = file.as_object() {
                context.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        if let Some(Value::Object(object)) = sub_config.get("from-object") {
            context.extend(object.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if let Some(Value::Object(from_parameters)) = sub_config.get("from-parameters") {
            for (var, path) in from_parameters {
                let choices: Vec<&str> = match path {
                    Value::String(s) => vec![s.as_str()],
                    Value::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
                    _ => continue,
                };
                for choice in choices {
                    let found = resolve_dotted_path(&params_json, choice).cloned();
                    if let Some(value) = found {
                        if !value.is_null() {
                            context.insert(var.clone(), value);
                            break;
                        }
                    }
                }
            }
        }

        if let Some(name) = task.get("name").cloned() {
            context.entry("name".to_string()).or_insert(name);
        }

        let fields: Vec<String> = sub_config
            .get("substitution-fields")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let mut as_value = Value::Object(task);
        substitute_task_fields(&mut as_value, &fields, &context)?;
        let Value::Object(task) = as_value else { unreachable!() };
        out.push(task);
    }

    Ok(out)
}
