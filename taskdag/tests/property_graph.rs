use std::collections::BTreeSet;

use proptest::prelude::*;

use taskdag::graph::{Graph, Label};

/// Generate a random DAG by only drawing edges from higher-numbered nodes
/// to lower-numbered ones.
fn arb_dag() -> impl Strategy<Value = Graph> {
    (2usize..12).prop_flat_map(|n| {
        let nodes: Vec<Label> = (0..n).map(|i| format!("n{i:02}")).collect();
        let edges = proptest::collection::vec((0..n, 0..n, 0..3usize), 0..24).prop_map(
            move |raw| {
                let edges: BTreeSet<(Label, Label, String)> = raw
                    .into_iter()
                    .filter(|(a, b, _)| a > b)
                    .map(|(a, b, e)| (format!("n{a:02}"), format!("n{b:02}"), format!("e{e}")))
                    .collect();
                Graph::new(nodes.clone(), edges)
            },
        );
        edges
    })
}

proptest! {
    #[test]
    fn postorder_respects_every_edge(graph in arb_dag()) {
        let order = graph.visit_postorder().expect("generated graphs are acyclic");
        prop_assert_eq!(order.len(), graph.nodes().len());
        let pos = |l: &str| order.iter().position(|o| o == l).expect("all nodes visited");
        for (from, to, _) in graph.edges() {
            // Dependencies come first.
            prop_assert!(pos(to) < pos(from));
        }
    }

    #[test]
    fn closure_contains_roots_and_is_idempotent(graph in arb_dag(), seed in 0usize..12) {
        let nodes: Vec<&Label> = graph.nodes().iter().collect();
        let root = nodes[seed % nodes.len()].clone();
        let roots: BTreeSet<Label> = [root].into();

        let once = graph.transitive_closure(&roots, false).expect("roots exist");
        prop_assert!(roots.iter().all(|r| once.nodes().contains(r)));
        prop_assert!(once.nodes().iter().all(|n| graph.nodes().contains(n)));

        let twice = once.transitive_closure(&once.nodes().clone(), false).expect("closed");
        prop_assert_eq!(once.nodes(), twice.nodes());
    }

    #[test]
    fn preorder_is_postorder_reversed_modulo_ties(graph in arb_dag()) {
        let pre = graph.visit_preorder().expect("acyclic");
        let post = graph.visit_postorder().expect("acyclic");
        prop_assert_eq!(pre.len(), post.len());
        // Both traversals visit the same node set.
        let pre_set: BTreeSet<&Label> = pre.iter().collect();
        let post_set: BTreeSet<&Label> = post.iter().collect();
        prop_assert_eq!(pre_set, post_set);
    }
}
