// src/transforms/notify.rs

//! Embed notification recipients and content into the task definition.
//!
//! ```yaml
//! notify:
//!   recipients:
//!     - type: email
//!       address: ci@example.com
//!       status-type: on-failed
//!   content:
//!     email:
//!       subject: "build failed"
//! ```
//!
//! Recipients become `notify.<type>...` routes on the task; content lands
//! under `extra.notify` where the notification service picks it up.

use serde_json::{json, Map, Value};

use crate::errors::Result;
use crate::registry::Registries;
use crate::util::schema::{
    any_of, enumeration, map, map_of, open_map, optional, required, seq, Schema,
};

use super::{transform_error, TaskStub, TransformConfig, TransformSequence};

pub const REFERENCE: &str = "taskdag.transforms.notify:transforms";

const STATUS_TYPES: &[&str] = &[
    "on-completed",
    "on-defined",
    "on-exception",
    "on-failed",
    "on-pending",
    "on-resolved",
    "on-running",
];

pub fn register(registries: &mut Registries) -> Result<()> {
    let mut transforms = TransformSequence::new();
    transforms.add_validate(notify_schema());
    transforms.add(add_notifications);
    registries.register_transforms(REFERENCE, transforms)
}

fn notify_schema() -> Schema {
    let recipient = map(vec![
        required("type", enumeration(&["email", "matrix-room", "pulse", "slack-channel"])),
        required("address", Schema::Str),
        optional("status-type", enumeration(STATUS_TYPES)),
    ]);

    open_map(vec![optional(
        "notify",
        map(vec![
            required("recipients", seq(any_of(vec![recipient]))),
            optional("content", map_of(Schema::Any)),
        ]),
    )])
}

fn add_notifications(config: &TransformConfig, tasks: Vec<TaskStub>) -> Result<Vec<TaskStub>> {
    let mut out = Vec::with_capacity(tasks.len());

    for mut task in tasks {
        let Some(notify) = task.remove("notify") else {
            out.push(task);
            continue;
        };

        let recipients = notify
            .get("recipients")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut routes: Vec<Value> = match task.get("routes") {
            Some(Value::Array(existing)) => existing.clone(),
            _ => Vec::new(),
        };

        for recipient in &recipients {
            let kind = recipient.get("type").and_then(|v| v.as_str()).unwrap_or("");
            let address = recipient
                .get("address")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    transform_error(config, &task, "notify recipient has no address".into())
                })?;
            let status = recipient
                .get("status-type")
                .and_then(|v| v.as_str())
                .unwrap_or("on-completed");

            let route = match kind {
                "email" => format!("notify.email.{address}.{status}"),
                "matrix-room" => format!("notify.matrix-room.{address}.{status}"),
                "pulse" => format!("notify.pulse.{address}.{status}"),
                "slack-channel" => format!("notify.slack-channel.{address}.{status}"),
                other => {
                    return Err(transform_error(
                        config,
                        &task,
                        format!("unknown notify recipient type '{other}'"),
                    ))
                }
            };
            routes.push(Value::String(route));
        }

        task.insert("routes".to_string(), Value::Array(routes));

        if let Some(content) = notify.get("content") {
            let extra = task
                .entry("extra".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(extra) = extra.as_object_mut() {
                extra.insert("notify".to_string(), content.clone());
            }
        } else if !recipients.is_empty() {
            // The notification service falls back to a generic message;
            // record that notifications were requested.
            let extra = task
                .entry("extra".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(extra) = extra.as_object_mut() {
                extra.entry("notify".to_string()).or_insert(json!({}));
            }
        }

        out.push(task);
    }

    Ok(out)
}
