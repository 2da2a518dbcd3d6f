// src/util/schema.rs

//! Data-driven validation of nested configuration mappings.
//!
//! Schemas are plain values built from the constructors at the bottom of
//! this module, so a transform can declare its expected input shape next to
//! its implementation and install it as a checkpoint on the sequence. The
//! validator reports the descriptor, the violating value and the expected
//! form, per the error-reporting contract.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

use crate::errors::{Result, TaskdagError};

/// A field of a mapping schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub required: bool,
    pub schema: Schema,
}

/// How a mapping schema treats keys it does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extra {
    Forbid,
    Allow,
}

#[derive(Debug, Clone)]
pub enum Schema {
    /// Anything goes.
    Any,
    Null,
    Bool,
    Int,
    Str,
    /// A string drawn from a fixed set.
    Enum(Vec<String>),
    /// A string matching an anchored regex.
    Pattern(String),
    /// A list whose elements all satisfy the inner schema.
    Seq(Box<Schema>),
    /// A mapping with declared fields.
    Map { fields: Vec<Field>, extra: Extra },
    /// A mapping with arbitrary string keys and uniform values.
    MapOf(Box<Schema>),
    /// Satisfied by the first matching variant.
    AnyOf(Vec<Schema>),
    /// Either a leaf satisfying the inner schema, or a (possibly nested)
    /// `by-<attr>` conditional over one of the named attributes whose
    /// alternatives all recurse into this same schema.
    KeyedBy {
        attrs: Vec<String>,
        leaf: Box<Schema>,
    },
}

impl Schema {
    pub fn validate(&self, value: &Value, descriptor: &str) -> Result<()> {
        self.validate_at(value, descriptor, descriptor)
    }

    fn validate_at(&self, value: &Value, descriptor: &str, path: &str) -> Result<()> {
        match self {
            Schema::Any => Ok(()),
            Schema::Null => expect(value.is_null(), value, "null", descriptor, path),
            Schema::Bool => expect(value.is_boolean(), value, "a boolean", descriptor, path),
            Schema::Int => expect(value.is_i64() || value.is_u64(), value, "an integer", descriptor, path),
            Schema::Str => expect(value.is_string(), value, "a string", descriptor, path),
            Schema::Enum(choices) => {
                let ok = value
                    .as_str()
                    .map(|s| choices.iter().any(|c| c == s))
                    .unwrap_or(false);
                expect(
                    ok,
                    value,
                    &format!("one of {}", choices.join(", ")),
                    descriptor,
                    path,
                )
            }
            Schema::Pattern(pattern) => {
                let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    schema_error(descriptor, path, &format!("bad schema pattern {pattern:?}: {e}"))
                })?;
                let ok = value.as_str().map(|s| re.is_match(s)).unwrap_or(false);
                expect(ok, value, &format!("a string matching /{pattern}/"), descriptor, path)
            }
            Schema::Seq(inner) => {
                let Some(items) = value.as_array() else {
                    return expect(false, value, "a list", descriptor, path);
                };
                for (i, item) in items.iter().enumerate() {
                    inner.validate_at(item, descriptor, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            Schema::Map { fields, extra } => {
                let Some(map) = value.as_object() else {
                    return expect(false, value, "a mapping", descriptor, path);
                };
                for field in fields {
                    match map.get(&field.name) {
                        Some(v) => {
                            field
                                .schema
                                .validate_at(v, descriptor, &format!("{path}.{}", field.name))?
                        }
                        None if field.required => {
                            return Err(schema_error(
                                descriptor,
                                path,
                                &format!("missing required key '{}'", field.name),
                            ))
                        }
                        None => {}
                    }
                }
                if *extra == Extra::Forbid {
                    let known: BTreeSet<&str> =
                        fields.iter().map(|f| f.name.as_str()).collect();
                    if let Some(unknown) = map.keys().find(|k| !known.contains(k.as_str())) {
                        return Err(schema_error(
                            descriptor,
                            path,
                            &format!("unknown key '{unknown}'"),
                        ));
                    }
                }
                Ok(())
            }
            Schema::MapOf(inner) => {
                let Some(map) = value.as_object() else {
                    return expect(false, value, "a mapping", descriptor, path);
                };
                for (key, v) in map {
                    inner.validate_at(v, descriptor, &format!("{path}.{key}"))?;
                }
                Ok(())
            }
            Schema::AnyOf(variants) => {
                for variant in variants {
                    if variant.validate_at(value, descriptor, path).is_ok() {
                        return Ok(());
                    }
                }
                Err(schema_error(
                    descriptor,
                    path,
                    &format!("{} matches none of the allowed forms", summarize(value)),
                ))
            }
            Schema::KeyedBy { attrs, leaf } => {
                if let Some(map) = value.as_object() {
                    if map.len() == 1 {
                        let (key, inner) = map.iter().next().expect("len checked");
                        if let Some(attr) = key.strip_prefix("by-") {
                            if attrs.iter().any(|a| a == attr) {
                                let Some(alternatives) = inner.as_object() else {
                                    return expect(
                                        false,
                                        inner,
                                        "a mapping of alternatives",
                                        descriptor,
                                        path,
                                    );
                                };
                                for (alt, v) in alternatives {
                                    self.validate_at(
                                        v,
                                        descriptor,
                                        &format!("{path}.{key}.{alt}"),
                                    )?;
                                }
                                return Ok(());
                            }
                        }
                    }
                }
                leaf.validate_at(value, descriptor, path)
            }
        }
    }
}

fn expect(ok: bool, value: &Value, wanted: &str, descriptor: &str, path: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(schema_error(
            descriptor,
            path,
            &format!("expected {wanted}, got {}", summarize(value)),
        ))
    }
}

fn summarize(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 120 {
        let truncated: String = rendered.chars().take(120).collect();
        format!("{truncated}...")
    } else {
        rendered
    }
}

fn schema_error(descriptor: &str, path: &str, message: &str) -> TaskdagError {
    TaskdagError::Schema {
        descriptor: descriptor.to_string(),
        message: if path == descriptor {
            message.to_string()
        } else {
            format!("at {path}: {message}")
        },
    }
}

// Constructors, so schema declarations read like the shape they describe.

pub fn required(name: &str, schema: Schema) -> Field {
    Field {
        name: name.to_string(),
        required: true,
        schema,
    }
}

pub fn optional(name: &str, schema: Schema) -> Field {
    Field {
        name: name.to_string(),
        required: false,
        schema,
    }
}

pub fn map(fields: Vec<Field>) -> Schema {
    Schema::Map {
        fields,
        extra: Extra::Forbid,
    }
}

pub fn open_map(fields: Vec<Field>) -> Schema {
    Schema::Map {
        fields,
        extra: Extra::Allow,
    }
}

pub fn seq(inner: Schema) -> Schema {
    Schema::Seq(Box::new(inner))
}

pub fn map_of(inner: Schema) -> Schema {
    Schema::MapOf(Box::new(inner))
}

pub fn any_of(variants: Vec<Schema>) -> Schema {
    Schema::AnyOf(variants)
}

pub fn enumeration(choices: &[&str]) -> Schema {
    Schema::Enum(choices.iter().map(|c| c.to_string()).collect())
}

/// Mark a schema value as optionally keyed by any of the named attributes.
pub fn optionally_keyed_by(attrs: &[&str], leaf: Schema) -> Schema {
    Schema::KeyedBy {
        attrs: attrs.iter().map(|a| a.to_string()).collect(),
        leaf: Box::new(leaf),
    }
}

/// The task priority levels understood by the execution platform.
pub const TASK_PRIORITIES: &[&str] = &[
    "highest",
    "very-high",
    "high",
    "medium",
    "low",
    "very-low",
    "lowest",
];
