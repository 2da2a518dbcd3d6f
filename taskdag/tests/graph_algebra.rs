use std::collections::BTreeSet;
use std::error::Error;

use taskdag::graph::{Graph, Label};

type TestResult = Result<(), Box<dyn Error>>;

fn diamond() -> Graph {
    // a ----> b ----> c
    //         |
    //         `-----> d
    Graph::new(
        ["a", "b", "c", "d"].map(String::from),
        [
            ("a".into(), "b".into(), "e1".into()),
            ("b".into(), "c".into(), "e2".into()),
            ("b".into(), "d".into(), "e3".into()),
        ],
    )
}

fn labels(items: &[&str]) -> BTreeSet<Label> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn closure_follows_edges_forward() -> TestResult {
    let closed = diamond().transitive_closure(&labels(&["b"]), false)?;
    assert_eq!(*closed.nodes(), labels(&["b", "c", "d"]));
    assert_eq!(closed.edges().len(), 2);
    Ok(())
}

#[test]
fn closure_reversed_finds_dependents() -> TestResult {
    let closed = diamond().transitive_closure(&labels(&["b"]), true)?;
    assert_eq!(*closed.nodes(), labels(&["a", "b"]));

    let closed = diamond().transitive_closure(&labels(&["c"]), true)?;
    assert_eq!(*closed.nodes(), labels(&["a", "b", "c"]));
    Ok(())
}

#[test]
fn closure_rejects_unknown_roots() {
    let err = diamond()
        .transitive_closure(&labels(&["nope"]), false)
        .unwrap_err();
    assert!(err.to_string().contains("unknown nodes"));
}

#[test]
fn postorder_visits_dependencies_first() -> TestResult {
    let order = diamond().visit_postorder()?;
    let pos = |l: &str| order.iter().position(|o| o == l).expect("present");
    assert!(pos("c") < pos("b"));
    assert!(pos("d") < pos("b"));
    assert!(pos("b") < pos("a"));
    Ok(())
}

#[test]
fn preorder_visits_dependents_first() -> TestResult {
    let order = diamond().visit_preorder()?;
    let pos = |l: &str| order.iter().position(|o| o == l).expect("present");
    assert!(pos("a") < pos("b"));
    assert!(pos("b") < pos("c"));
    Ok(())
}

#[test]
fn traversal_breaks_ties_lexicographically() -> TestResult {
    // No edges at all: the order must be fully alphabetical.
    let g = Graph::new(["zeta", "alpha", "mid"].map(String::from), []);
    assert_eq!(g.visit_postorder()?, vec!["alpha", "mid", "zeta"]);
    Ok(())
}

#[test]
fn cycles_are_detected_and_named() {
    let g = Graph::new(
        ["x", "y", "standalone"].map(String::from),
        [
            ("x".into(), "y".into(), "e1".into()),
            ("y".into(), "x".into(), "e2".into()),
        ],
    );
    let err = g.visit_postorder().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("cycle"));
    assert!(message.contains('x') && message.contains('y'));
    assert!(!message.contains("standalone"));
}

#[test]
fn named_links_expose_edge_names() {
    let links = diamond().named_links_dict();
    assert_eq!(links["b"]["e2"], "c");
    assert_eq!(links["b"]["e3"], "d");
    assert!(!links.contains_key("c"));
}

#[test]
fn multiple_edges_between_same_nodes_are_kept() -> TestResult {
    let g = Graph::new(
        ["up", "down"].map(String::from),
        [
            ("up".into(), "down".into(), "first".into()),
            ("up".into(), "down".into(), "second".into()),
        ],
    );
    assert_eq!(g.edges().len(), 2);
    let links = g.named_links_dict();
    assert_eq!(links["up"].len(), 2);
    Ok(())
}
