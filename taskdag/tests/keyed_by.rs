use std::collections::BTreeMap;
use std::error::Error;

use serde_json::{json, Value};

use taskdag::util::keyed_by::{evaluate_keyed_by, resolve_keyed_by};

type TestResult = Result<(), Box<dyn Error>>;

fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

#[test]
fn plain_values_pass_through() -> TestResult {
    let value = json!(12);
    assert_eq!(evaluate_keyed_by(&value, "chunks", &attrs(&[]))?, json!(12));
    Ok(())
}

#[test]
fn exact_match_beats_regex() -> TestResult {
    let value = json!({
        "by-platform": {
            "linux": 1,
            "linux.*": 2,
            "default": 3,
        }
    });
    let resolved = evaluate_keyed_by(&value, "chunks", &attrs(&[("platform", "linux")]))?;
    assert_eq!(resolved, json!(1));
    Ok(())
}

#[test]
fn regex_matches_whole_value() -> TestResult {
    let value = json!({
        "by-platform": {
            "linux.*": 2,
            "default": 3,
        }
    });
    assert_eq!(
        evaluate_keyed_by(&value, "chunks", &attrs(&[("platform", "linux64")]))?,
        json!(2)
    );
    // The pattern is anchored; a mid-string match is not enough.
    assert_eq!(
        evaluate_keyed_by(&value, "chunks", &attrs(&[("platform", "mylinux64")]))?,
        json!(3)
    );
    Ok(())
}

#[test]
fn ambiguous_regex_match_is_an_error() {
    let value = json!({
        "by-platform": {
            "linux.*": 1,
            ".*64": 2,
        }
    });
    let err = evaluate_keyed_by(&value, "chunks", &attrs(&[("platform", "linux64")])).unwrap_err();
    assert!(err.to_string().contains("more than one"));
}

#[test]
fn missing_match_without_default_is_an_error() {
    let value = json!({
        "by-platform": {
            "mac": 1,
        }
    });
    let err = evaluate_keyed_by(&value, "chunks", &attrs(&[("platform", "linux")])).unwrap_err();
    assert!(err.to_string().contains("no alternative matches"));
}

#[test]
fn unset_attribute_falls_back_to_default() -> TestResult {
    let value = json!({
        "by-platform": {
            "mac": 1,
            "default": 9,
        }
    });
    assert_eq!(evaluate_keyed_by(&value, "chunks", &attrs(&[]))?, json!(9));
    Ok(())
}

#[test]
fn nested_conditionals_resolve_through() -> TestResult {
    let value = json!({
        "by-platform": {
            "win.*": {
                "by-project": {
                    "stage": 7,
                    "default": 12,
                }
            },
            "default": 1,
        }
    });
    let resolved = evaluate_keyed_by(
        &value,
        "chunks",
        &attrs(&[("platform", "win64"), ("project", "stage")]),
    )?;
    assert_eq!(resolved, json!(7));
    Ok(())
}

#[test]
fn resolve_in_place_uses_item_fields_and_extra_context() -> TestResult {
    let mut item = json!({
        "platform": "linux",
        "chunks": {
            "by-platform": {
                "linux": 4,
                "default": 1,
            }
        },
        "timeout": {
            "by-project": {
                "prod": 90,
                "default": 30,
            }
        },
    });

    resolve_keyed_by(&mut item, "chunks", "the-task", &BTreeMap::new())?;
    assert_eq!(item["chunks"], json!(4));

    // `project` is not a field of the item; it comes from extra context,
    // which also overrides same-named fields.
    resolve_keyed_by(&mut item, "timeout", "the-task", &attrs(&[("project", "prod")]))?;
    assert_eq!(item["timeout"], json!(90));
    Ok(())
}

#[test]
fn resolve_fans_out_over_lists() -> TestResult {
    let mut item = json!({
        "platform": "mac",
        "artifacts": [
            { "name": { "by-platform": { "mac": "a.dmg", "default": "a.tar" } } },
            { "name": { "by-platform": { "default": "b.tar" } } },
        ],
    });
    resolve_keyed_by(&mut item, "artifacts[].name", "the-task", &BTreeMap::new())?;
    assert_eq!(item["artifacts"][0]["name"], json!("a.dmg"));
    assert_eq!(item["artifacts"][1]["name"], json!("b.tar"));
    Ok(())
}

#[test]
fn subtrees_without_by_keys_are_ignored() -> TestResult {
    let mut item = json!({
        "options": { "flavor": "plain" },
    });
    let before = item.clone();
    resolve_keyed_by(&mut item, "options", "the-task", &BTreeMap::new())?;
    assert_eq!(item, before);
    Ok(())
}
