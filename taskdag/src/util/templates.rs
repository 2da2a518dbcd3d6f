// src/util/templates.rs

//! `{placeholder}` interpolation for task fields.
//!
//! Transforms such as task-context, matrix and chunking substitute values
//! into designated fields. The syntax is a subset of Python's `str.format`:
//! `{name}` and the single-index form `{name[key]}`, with `{{`/`}}` as
//! escapes. Substitution recurses through mappings (keys included) and
//! lists; a placeholder with no corresponding context entry is an error, so
//! typos in kind configuration surface instead of shipping literally.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::{Result, TaskdagError};

/// Interpolate `context` into every string inside `value`, recursively.
pub fn substitute(value: &Value, context: &BTreeMap<String, Value>) -> Result<Value> {
    Ok(match value {
        Value::String(s) => Value::String(substitute_str(s, context)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute(v, context))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                out.insert(substitute_str(key, context)?, substitute(val, context)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// Interpolate `context` into a single string.
pub fn substitute_str(template: &str, context: &BTreeMap<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut placeholder = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    placeholder.push(c);
                }
                if !closed {
                    return Err(template_error(template, "unterminated '{'"));
                }
                out.push_str(&lookup(&placeholder, context).ok_or_else(|| {
                    template_error(template, &format!("unknown placeholder '{{{placeholder}}}'"))
                })?);
            }
            '}' => return Err(template_error(template, "unmatched '}'")),
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Substitute into the fields of `task` named by dotted paths.
pub fn substitute_task_fields(
    task: &mut Value,
    fields: &[String],
    context: &BTreeMap<String, Value>,
) -> Result<()> {
    for field in fields {
        let Some(slot) = resolve_dotted_path_mut(task, field) else {
            continue;
        };
        *slot = substitute(slot, context)?;
    }
    Ok(())
}

/// Walk a dotted path (`a.b.c`) into a value, immutably.
pub fn resolve_dotted_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Walk a dotted path into a value, mutably.
pub fn resolve_dotted_path_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.as_object_mut()?.get_mut(part)?;
    }
    Some(current)
}

fn lookup(placeholder: &str, context: &BTreeMap<String, Value>) -> Option<String> {
    let (name, index) = match placeholder.split_once('[') {
        Some((name, rest)) => (name, Some(rest.strip_suffix(']')?)),
        None => (placeholder, None),
    };

    let mut value = context.get(name)?;
    if let Some(index) = index {
        value = value.as_object()?.get(index)?;
    }
    Some(render(value))
}

/// Render a substitution value the way it should appear inside a string.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn template_error(template: &str, message: &str) -> TaskdagError {
    TaskdagError::Other(anyhow::anyhow!("in template {template:?}: {message}"))
}
