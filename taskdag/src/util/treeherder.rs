// src/util/treeherder.rs

//! Treeherder symbol handling.

use crate::errors::{Result, TaskdagError};

/// Split a treeherder symbol into `(group, symbol)`; a bare symbol has the
/// anonymous group `?`.
pub fn split_symbol(symbol: &str) -> (String, String) {
    match symbol.split_once('(') {
        Some((group, rest)) => (
            group.to_string(),
            rest.trim_end_matches(')').to_string(),
        ),
        None => ("?".to_string(), symbol.to_string()),
    }
}

/// Inverse of [`split_symbol`].
pub fn join_symbol(group: &str, symbol: &str) -> String {
    if group == "?" {
        symbol.to_string()
    } else {
        format!("{group}({symbol})")
    }
}

/// Append a suffix to the symbol part, preserving any group.
pub fn add_suffix(symbol: &str, suffix: &str) -> String {
    let (group, sym) = split_symbol(symbol);
    join_symbol(&group, &format!("{sym}{suffix}"))
}

/// Split `platform/collection` as used by the `treeherder.platform` field.
pub fn split_platform(platform: &str) -> Result<(String, String)> {
    platform
        .split_once('/')
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .ok_or_else(|| {
            TaskdagError::Config(format!(
                "treeherder platform {platform:?} must have the form <platform>/<collection>"
            ))
        })
}
