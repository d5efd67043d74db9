//! Flow validation. Run this before persisting or executing a flow.
//!
//! Rules checked:
//! 1. Every node type has a registered handler.
//! 2. Every node passes its handler's `validate`.
//! 3. Every edge references existing nodes on both sides.
//! 4. The directed graph is acyclic (topological sort must succeed).
//!
//! Start/end uniqueness and id uniqueness are already guaranteed by
//! [`Flow`] construction. Unlike execution, validation does not stop at the
//! first problem: every finding is collected into a [`ValidationReport`].

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use dagflow_nodes::HandlerRegistry;

use crate::models::Flow;

/// Outcome of [`validate_flow`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Check a flow against the handlers in `registry`.
pub fn validate_flow(flow: &Flow, registry: &HandlerRegistry) -> ValidationReport {
    let mut errors = Vec::new();

    // -----------------------------------------------------------------------
    // 1 + 2. Handler lookup and per-node configuration
    // -----------------------------------------------------------------------
    for node in flow.nodes.values() {
        match registry.get(&node.node_type) {
            Ok(handler) => {
                if let Err(e) = handler.validate(node) {
                    errors.push(format!(
                        "node '{}' ({}) is misconfigured: {e}",
                        node.label(),
                        node.id
                    ));
                }
            }
            Err(e) => errors.push(format!(
                "node '{}' ({}) has an invalid type: {e}",
                node.label(),
                node.id
            )),
        }
    }

    // -----------------------------------------------------------------------
    // 3. Edge endpoints
    // -----------------------------------------------------------------------
    let mut dangling = false;
    for edge in flow.edges.values() {
        for (side, node_id) in [("source", &edge.source), ("target", &edge.target)] {
            if !flow.nodes.contains_key(node_id) {
                dangling = true;
                errors.push(format!(
                    "edge '{}' references unknown node '{node_id}' ({side} side)",
                    edge.id
                ));
            }
        }
    }

    // -----------------------------------------------------------------------
    // 4. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    // Dangling edges would skew in-degrees; report them alone.
    if !dangling && topological_order(flow).is_none() {
        errors.push("flow graph contains a cycle".to_owned());
    }

    ValidationReport::from_errors(errors)
}

/// Node ids in a topological order, or `None` if the graph has a cycle.
pub fn topological_order(flow: &Flow) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for id in flow.nodes.keys() {
        adjacency.entry(id.as_str()).or_default();
        in_degree.entry(id.as_str()).or_insert(0);
    }
    for edge in flow.edges.values() {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    // Seed with nodes that have no incoming edges, in id order.
    let mut queue: VecDeque<&str> = flow
        .nodes
        .keys()
        .map(String::as_str)
        .filter(|id| in_degree.get(id).copied() == Some(0))
        .collect();

    let mut sorted = Vec::with_capacity(in_degree.len());
    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());
        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    (sorted.len() == in_degree.len()).then_some(sorted)
}
