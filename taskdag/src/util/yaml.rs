// src/util/yaml.rs

//! YAML loading helpers.
//!
//! Everything downstream of the loaders works on `serde_json::Value`, so
//! YAML documents are transcoded right after parsing. A small per-process
//! cache keyed by absolute path avoids re-reading `tasks-from` files that
//! several kinds share; entries are invalidated by content hash, so a
//! changed file is always re-read.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::OnceLock;

use serde_json::Value;

use crate::errors::{Result, TaskdagError};

static CACHE: OnceLock<Mutex<HashMap<PathBuf, (String, Value)>>> = OnceLock::new();

/// Load a YAML file as a JSON value, through the path-keyed cache.
pub fn load_yaml(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let abs = path
        .canonicalize()
        .map_err(|e| TaskdagError::Config(format!("cannot resolve {}: {e}", path.display())))?;

    let contents = fs::read_to_string(&abs)?;
    let digest = blake3::hash(contents.as_bytes()).to_hex().to_string();

    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().expect("yaml cache poisoned");
    if let Some((cached_digest, value)) = cache.get(&abs) {
        if *cached_digest == digest {
            return Ok(value.clone());
        }
    }

    let value = parse_yaml(&contents)
        .map_err(|e| TaskdagError::Config(format!("parsing {}: {e}", abs.display())))?;
    cache.insert(abs, (digest, value.clone()));
    Ok(value)
}

/// Parse a YAML string into a JSON value. Mapping keys must be strings.
pub fn parse_yaml(contents: &str) -> Result<Value> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(contents)?;
    let json = serde_json::to_value(&yaml)?;
    Ok(json)
}
