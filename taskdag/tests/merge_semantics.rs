use serde_json::json;

use taskdag::util::merge::{deep_merge, is_keyed_by};

#[test]
fn mappings_merge_recursively() {
    let base = json!({
        "worker": { "env": { "A": "1" }, "max-run-time": 600 },
        "description": "base",
    });
    let override_ = json!({
        "worker": { "env": { "B": "2" } },
        "description": "override",
    });

    let merged = deep_merge(&base, &override_);
    assert_eq!(merged["worker"]["env"], json!({ "A": "1", "B": "2" }));
    assert_eq!(merged["worker"]["max-run-time"], json!(600));
    assert_eq!(merged["description"], json!("override"));
}

#[test]
fn scalars_and_lists_are_replaced() {
    let base = json!({ "routes": ["one", "two"], "retries": 5 });
    let override_ = json!({ "routes": ["three"] });

    let merged = deep_merge(&base, &override_);
    assert_eq!(merged["routes"], json!(["three"]));
    assert_eq!(merged["retries"], json!(5));
}

#[test]
fn keyed_by_values_are_replaced_not_merged() {
    let base = json!({
        "chunks": { "by-platform": { "linux": 4, "default": 1 } },
    });
    let override_ = json!({
        "chunks": { "by-platform": { "mac": 2 } },
    });

    let merged = deep_merge(&base, &override_);
    // The base's alternatives must not leak into the override's.
    assert_eq!(merged["chunks"], json!({ "by-platform": { "mac": 2 } }));
}

#[test]
fn keyed_by_on_either_side_wins_whole() {
    let base = json!({ "chunks": 4 });
    let override_ = json!({ "chunks": { "by-platform": { "default": 1 } } });
    let merged = deep_merge(&base, &override_);
    assert_eq!(merged["chunks"], json!({ "by-platform": { "default": 1 } }));

    let base = json!({ "chunks": { "by-platform": { "default": 1 } } });
    let override_ = json!({ "chunks": { "anything": true } });
    let merged = deep_merge(&base, &override_);
    assert_eq!(merged["chunks"], json!({ "anything": true }));
}

#[test]
fn merge_is_idempotent_when_override_is_subset() {
    let base = json!({
        "worker": { "env": { "A": "1" } },
        "routes": ["r"],
    });
    let override_ = json!({
        "worker": { "env": { "A": "1" } },
    });

    let once = deep_merge(&base, &override_);
    assert_eq!(once, base);
    let twice = deep_merge(&once, &override_);
    assert_eq!(twice, once);
}

#[test]
fn keyed_by_detection() {
    assert!(is_keyed_by(&json!({ "by-platform": {} })));
    assert!(!is_keyed_by(&json!({ "platform": {} })));
    assert!(!is_keyed_by(&json!("by-platform")));
}
