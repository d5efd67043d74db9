//! Flow graph model: nodes, guarded edges and the flow itself.
//!
//! A [`Flow`] can only be built through [`Flow::new`] or by deserializing a
//! [`FlowDefinition`]; both paths enforce exactly one start node, exactly
//! one end node and unique node/edge ids. Edge endpoints are deliberately
//! not checked here (see `validate_flow`); a dangling target surfaces as
//! `NodeNotFound` when traversal reaches it.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use dagflow_nodes::system::{TYPE_END, TYPE_START};
use dagflow_nodes::TaskNode;

use crate::EngineError;

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed connection between two nodes, optionally guarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Guard expression; empty means the edge is always taken.
    #[serde(default)]
    pub expression: String,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn guarded(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    pub fn is_conditional(&self) -> bool {
        !self.expression.trim().is_empty()
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// ---------------------------------------------------------------------------
// FlowDefinition
// ---------------------------------------------------------------------------

/// Serialized form of a flow, as produced by a loader or an editor export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub disabled: bool,
    pub nodes: Vec<TaskNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Explicit start node; detected from the `start` typed node when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,
    /// Explicit end node; detected from the `end` typed node when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_node_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// A validated flow graph. Immutable once loaded in practice; the engine
/// only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FlowDefinition", into = "FlowDefinition")]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub disabled: bool,
    pub nodes: BTreeMap<String, TaskNode>,
    pub edges: BTreeMap<String, Edge>,
    start_node_id: String,
    end_node_id: String,
}

impl Flow {
    /// Build a flow, detecting the start/end nodes from their types.
    ///
    /// # Errors
    /// - [`EngineError::DuplicateNodeId`] / [`EngineError::DuplicateEdgeId`].
    /// - [`EngineError::MissingStartNode`] / [`EngineError::MultipleStartNodes`]
    ///   (and the end-node equivalents).
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        nodes: Vec<TaskNode>,
        edges: Vec<Edge>,
    ) -> Result<Self, EngineError> {
        FlowDefinition {
            id: id.into(),
            name: name.into(),
            nodes,
            edges,
            ..FlowDefinition::default()
        }
        .try_into()
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn end_node_id(&self) -> &str {
        &self.end_node_id
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Edges leaving `node_id`, in edge-id order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.values().filter(move |e| e.source == node_id)
    }

    /// Number of edges entering `node_id` anywhere in the flow.
    pub fn incoming_count(&self, node_id: &str) -> usize {
        self.edges.values().filter(|e| e.target == node_id).count()
    }
}

/// Resolve the unique node of `node_type`, or check an explicit choice.
fn pick_terminal(
    explicit: Option<String>,
    nodes: &BTreeMap<String, TaskNode>,
    node_type: &str,
    missing: EngineError,
    multiple: fn(Vec<String>) -> EngineError,
) -> Result<String, EngineError> {
    if let Some(id) = explicit.filter(|id| !id.is_empty()) {
        return if nodes.contains_key(&id) {
            Ok(id)
        } else {
            Err(EngineError::NodeNotFound(id))
        };
    }

    let found: Vec<String> = nodes
        .values()
        .filter(|n| n.node_type == node_type)
        .map(|n| n.id.clone())
        .collect();
    match found.len() {
        0 => Err(missing),
        1 => Ok(found.into_iter().next().unwrap_or_default()),
        _ => Err(multiple(found)),
    }
}

impl TryFrom<FlowDefinition> for Flow {
    type Error = EngineError;

    fn try_from(def: FlowDefinition) -> Result<Self, Self::Error> {
        let mut nodes = BTreeMap::new();
        for node in def.nodes {
            if nodes.contains_key(&node.id) {
                return Err(EngineError::DuplicateNodeId(node.id));
            }
            nodes.insert(node.id.clone(), node);
        }

        let mut edges = BTreeMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        for mut edge in def.edges {
            if edge.id.is_empty() {
                edge.id = format!("{}->{}", edge.source, edge.target);
            }
            if !seen.insert(edge.id.clone()) {
                return Err(EngineError::DuplicateEdgeId(edge.id));
            }
            edges.insert(edge.id.clone(), edge);
        }

        let start_node_id = pick_terminal(
            def.start_node_id,
            &nodes,
            TYPE_START,
            EngineError::MissingStartNode,
            EngineError::MultipleStartNodes,
        )?;
        let end_node_id = pick_terminal(
            def.end_node_id,
            &nodes,
            TYPE_END,
            EngineError::MissingEndNode,
            EngineError::MultipleEndNodes,
        )?;

        Ok(Self {
            id: def.id,
            name: def.name,
            description: def.description,
            version: def.version,
            disabled: def.disabled,
            nodes,
            edges,
            start_node_id,
            end_node_id,
        })
    }
}

impl From<Flow> for FlowDefinition {
    fn from(flow: Flow) -> Self {
        Self {
            id: flow.id,
            name: flow.name,
            description: flow.description,
            version: flow.version,
            disabled: flow.disabled,
            nodes: flow.nodes.into_values().collect(),
            edges: flow.edges.into_values().collect(),
            start_node_id: Some(flow.start_node_id),
            end_node_id: Some(flow.end_node_id),
        }
    }
}
