// src/graph.rs

//! Immutable directed graph of labels with named edges.
//!
//! This is the algebra underneath every generation phase: reachability,
//! transitive closure in both directions, deterministic topological
//! traversal, and cycle detection. Operations never mutate; anything that
//! would change the graph returns a new one. Equality is structural.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TaskdagError};

pub type Label = String;

/// An edge `(from, to, name)`: `from` depends on `to` through the edge
/// called `name`. At most one edge of a given name exists between any pair
/// of nodes.
pub type Edge = (Label, Label, String);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    nodes: BTreeSet<Label>,
    edges: BTreeSet<Edge>,
}

impl Graph {
    pub fn new(
        nodes: impl IntoIterator<Item = Label>,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            edges: edges.into_iter().collect(),
        }
    }

    pub fn nodes(&self) -> &BTreeSet<Label> {
        &self.nodes
    }

    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    pub fn contains(&self, label: &str) -> bool {
        self.nodes.contains(label)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The graph containing `roots`, every node reachable from them along
    /// dependency edges, and the intervening edges. With `reverse` the
    /// direction flips: the result is every node that can reach `roots`.
    pub fn transitive_closure(&self, roots: &BTreeSet<Label>, reverse: bool) -> Result<Graph> {
        let unknown: Vec<&Label> = roots.iter().filter(|r| !self.nodes.contains(*r)).collect();
        if !unknown.is_empty() {
            return Err(TaskdagError::Dependency(format!(
                "unknown nodes in transitive closure: {}",
                unknown
                    .iter()
                    .map(|l| l.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        // Expand along edges until a fixed point is reached.
        let mut nodes: BTreeSet<Label> = roots.clone();
        let mut edges: BTreeSet<Edge> = BTreeSet::new();
        loop {
            let add_edges: BTreeSet<Edge> = self
                .edges
                .iter()
                .filter(|(left, right, _)| nodes.contains(if reverse { right } else { left }))
                .cloned()
                .collect();
            let add_nodes: BTreeSet<Label> = add_edges
                .iter()
                .map(|(left, right, _)| if reverse { left } else { right }.clone())
                .collect();

            let grew = add_nodes.iter().any(|n| !nodes.contains(n))
                || add_edges.iter().any(|e| !edges.contains(e));
            nodes.extend(add_nodes);
            edges.extend(add_edges);
            if !grew {
                break;
            }
        }

        Ok(Graph { nodes, edges })
    }

    /// Labels in postorder: every node is visited *after* the nodes it links
    /// to (dependencies first). Ties break lexicographically, so the order
    /// is fully deterministic. Fails with a `DependencyError` naming the
    /// participating labels if the graph has a cycle.
    pub fn visit_postorder(&self) -> Result<Vec<Label>> {
        self.visit(false)
    }

    /// Like [`Graph::visit_postorder`] but reversed: every node is visited
    /// *before* the nodes it links to (dependents first).
    pub fn visit_preorder(&self) -> Result<Vec<Label>> {
        self.visit(true)
    }

    fn visit(&self, reverse: bool) -> Result<Vec<Label>> {
        let forward = self.links_dict();
        let backward = self.reverse_links_dict();
        let (dependencies, dependents) = if reverse {
            (&backward, &forward)
        } else {
            (&forward, &backward)
        };

        let mut indegree: BTreeMap<&Label, usize> = self
            .nodes
            .iter()
            .map(|n| (n, dependencies.get(n).map_or(0, |d| d.len())))
            .collect();

        // Ready set rather than a queue: BTreeSet iteration gives the
        // lexicographically smallest ready label at each step.
        let mut ready: BTreeSet<&Label> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| *n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.iter().next().cloned() {
            ready.remove(node);
            order.push(node.clone());

            if let Some(deps) = dependents.get(node) {
                for dependent in deps {
                    let Some(deg) = indegree.get_mut(dependent) else {
                        continue;
                    };
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck: Vec<&str> = self
                .nodes
                .iter()
                .filter(|n| !order.contains(n))
                .map(|n| n.as_str())
                .collect();
            return Err(TaskdagError::Dependency(format!(
                "cycle detected among tasks: {}",
                stuck.join(", ")
            )));
        }

        Ok(order)
    }

    /// For each node, the set of nodes it links to (edge names dropped).
    pub fn links_dict(&self) -> BTreeMap<Label, BTreeSet<Label>> {
        let mut links: BTreeMap<Label, BTreeSet<Label>> = BTreeMap::new();
        for (left, right, _) in &self.edges {
            links.entry(left.clone()).or_default().insert(right.clone());
        }
        links
    }

    /// For each node, the set of nodes linking to it.
    pub fn reverse_links_dict(&self) -> BTreeMap<Label, BTreeSet<Label>> {
        let mut links: BTreeMap<Label, BTreeSet<Label>> = BTreeMap::new();
        for (left, right, _) in &self.edges {
            links.entry(right.clone()).or_default().insert(left.clone());
        }
        links
    }

    /// For each node, the mapping `edge-name -> dependency label`.
    pub fn named_links_dict(&self) -> BTreeMap<Label, BTreeMap<String, Label>> {
        let mut links: BTreeMap<Label, BTreeMap<String, Label>> = BTreeMap::new();
        for (left, right, name) in &self.edges {
            links
                .entry(left.clone())
                .or_default()
                .insert(name.clone(), right.clone());
        }
        links
    }
}
