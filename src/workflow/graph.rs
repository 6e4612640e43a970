/// Petgraph-based view of a workflow
///
/// Resolves every node's type against the node type registry once, so the
/// activation code can ask "which nodes are triggers / pollers / webhooks"
/// without touching the registry again.

use crate::{
    nodes::{builtin, NodeKind},
    workflow::{
        node_types::NodeTypes,
        types::{Node, WorkflowRecord},
    },
};
use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use std::{collections::HashMap, sync::Arc};

/// Node types that never make a workflow eligible for activation
pub const STARTING_NODES: [&str; 3] = [builtin::MANUAL_TRIGGER, builtin::EXECUTE_WORKFLOW_TRIGGER, "flowgate.start"];

/// A node together with its resolved capability
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub node: Node,
    /// `None` when the node type isn't registered
    pub kind: Option<NodeKind>,
}

impl GraphNode {
    fn is_enabled_kind(&self, matches: fn(&NodeKind) -> bool) -> bool {
        !self.node.disabled && self.kind.as_ref().is_some_and(matches)
    }
}

/// Directed graph of a workflow's nodes
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    record: Arc<WorkflowRecord>,
    graph: DiGraph<GraphNode, ()>,
    /// Mapping from node name to graph node index
    node_index: HashMap<String, NodeIndex>,
}

impl WorkflowGraph {
    /// Build the graph, resolving node types
    ///
    /// Fails on duplicate node names and on connections to unknown nodes.
    pub fn build(record: Arc<WorkflowRecord>, node_types: &NodeTypes) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for node in &record.nodes {
            if node_index.contains_key(&node.name) {
                return Err(anyhow::anyhow!(
                    "Workflow {} has more than one node named '{}'",
                    record.id,
                    node.name
                ));
            }
            let kind = node_types.kind_of(&node.node_type, node.type_version);
            if kind.is_none() {
                tracing::debug!(
                    "Node '{}' of workflow {} has unknown type {}@{}",
                    node.name,
                    record.id,
                    node.node_type,
                    node.type_version
                );
            }
            let index = graph.add_node(GraphNode { node: node.clone(), kind });
            node_index.insert(node.name.clone(), index);
        }

        for connection in &record.connections {
            let from = node_index
                .get(&connection.from)
                .ok_or_else(|| anyhow::anyhow!("Connection source not found: {}", connection.from))?;
            let to = node_index
                .get(&connection.to)
                .ok_or_else(|| anyhow::anyhow!("Connection target not found: {}", connection.to))?;
            graph.add_edge(*from, *to, ());
        }

        Ok(Self {
            record,
            graph,
            node_index,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn record(&self) -> &Arc<WorkflowRecord> {
        &self.record
    }

    /// All nodes, in definition order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_indices().map(move |index| &self.graph[index])
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.node_index.get(name).map(|index| &self.graph[*index])
    }

    /// Names of the nodes directly fed by `name`
    pub fn children(&self, name: &str) -> Vec<&str> {
        let Some(index) = self.node_index.get(name) else {
            return Vec::new();
        };
        let mut children: Vec<&str> = self
            .graph
            .neighbors(*index)
            .map(|child| self.graph[child].node.name.as_str())
            .collect();
        // neighbors() walks edges newest first
        children.reverse();
        children
    }

    /// Enabled trigger nodes
    pub fn trigger_nodes(&self) -> Vec<&GraphNode> {
        self.nodes()
            .filter(|n| n.is_enabled_kind(|kind| matches!(kind, NodeKind::Trigger(_))))
            .collect()
    }

    /// Enabled poll nodes
    pub fn poll_nodes(&self) -> Vec<&GraphNode> {
        self.nodes()
            .filter(|n| n.is_enabled_kind(|kind| matches!(kind, NodeKind::Poll(_))))
            .collect()
    }

    /// Enabled webhook nodes
    pub fn webhook_nodes(&self) -> Vec<&GraphNode> {
        self.nodes()
            .filter(|n| n.is_enabled_kind(|kind| matches!(kind, NodeKind::Webhook(_))))
            .collect()
    }

    /// Whether anything needs the trigger/poll registry
    pub fn has_triggers_or_pollers(&self) -> bool {
        !self.trigger_nodes().is_empty() || !self.poll_nodes().is_empty()
    }

    /// Whether at least one enabled node, not of an ignored type, can start a run
    pub fn can_be_activated(&self, ignored_types: &[&str]) -> bool {
        self.nodes().any(|n| {
            !n.node.disabled
                && !ignored_types.contains(&n.node.node_type.as_str())
                && n.kind.as_ref().is_some_and(NodeKind::can_start)
        })
    }

    /// Triggers (other than ignored ones), pollers and webhooks of this workflow
    pub fn trigger_count(&self, ignored_types: &[&str]) -> usize {
        let triggers = self
            .trigger_nodes()
            .into_iter()
            .filter(|n| !ignored_types.contains(&n.node.node_type.as_str()))
            .count();
        triggers + self.poll_nodes().len() + self.webhook_nodes().len()
    }
}
