//! TaskGraph: a labelled DAG of task nodes, edges carrying the
//! destination input port.
//!
//! Grounded on the teacher's `DependencyGraph` (same `DiGraph` +
//! `NodeIndex` lookup shape, `toposort`-based ordering). Unlike the
//! teacher, which tolerates cycles as legal audio feedback loops, this
//! graph rejects any edge that would create one: `connect` is the only
//! way to add an edge, and it checks acyclicity before committing.

use crate::error::{Result, TopologyError, UfoError};
use crate::group::SendPattern;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

pub type NodeId = String;

#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub plugin_name: String,
    pub unique_name: NodeId,
    pub send_pattern: SendPattern,
    pub partition: (u32, u32),
}

impl NodeMeta {
    pub fn new(unique_name: impl Into<String>, plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            unique_name: unique_name.into(),
            send_pattern: SendPattern::Scatter,
            partition: (0, 1),
        }
    }
}

pub struct TaskGraph {
    graph: DiGraph<NodeMeta, u32>,
    index: HashMap<NodeId, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, meta: NodeMeta) -> NodeId {
        let id = meta.unique_name.clone();
        let idx = self.graph.add_node(meta);
        self.index.insert(id.clone(), idx);
        id
    }

    /// Connects `src -> dst` on `dst`'s `input_port`. Rejects the edge
    /// (without mutating the graph) if it would create a cycle.
    pub fn connect(&mut self, src: &str, dst: &str, input_port: u32) -> Result<()> {
        let src_idx = self.node_index(src)?;
        let dst_idx = self.node_index(dst)?;
        let edge = self.graph.add_edge(src_idx, dst_idx, input_port);
        if toposort(&self.graph, None).is_err() {
            self.graph.remove_edge(edge);
            return Err(UfoError::Topology(TopologyError::Cycle(dst.to_string())));
        }
        Ok(())
    }

    fn node_index(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| UfoError::Config(crate::error::ConfigError::UnknownNode(id.to_string())))
    }

    pub fn node(&self, id: &str) -> Option<&NodeMeta> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeMeta> {
        if let Some(&idx) = self.index.get(id) {
            Some(&mut self.graph[idx])
        } else {
            None
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.index.keys()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Ids of nodes with no incoming edges, in insertion order.
    pub fn source_nodes(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|idx| self.graph[idx].unique_name.clone())
            .collect()
    }

    /// Successors of `id` paired with the input port they're connected
    /// on, in registration order.
    pub fn successors(&self, id: &str) -> Result<Vec<(NodeId, u32)>> {
        let idx = self.node_index(id)?;
        Ok(self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|edge| (self.graph[edge.target()].unique_name.clone(), *edge.weight()))
            .collect())
    }

    pub fn predecessors(&self, id: &str) -> Result<Vec<NodeId>> {
        let idx = self.node_index(id)?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|i| self.graph[i].unique_name.clone())
            .collect())
    }

    /// Execution order respecting all edges; used by the scheduler only
    /// for deterministic setup/teardown iteration, not for scheduling
    /// itself (workers run concurrently).
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|idx| self.graph[idx].unique_name.clone()).collect())
            .map_err(|cycle| {
                let name = self.graph[cycle.node_id()].unique_name.clone();
                UfoError::Topology(TopologyError::Cycle(name))
            })
    }

    /// Replace a node's metadata in place, preserving all edges (the
    /// underlying `NodeIndex` and thus every edge stays valid).
    pub fn replace_node(&mut self, id: &str, meta: NodeMeta) -> Result<()> {
        let idx = self.node_index(id)?;
        self.index.remove(id);
        self.index.insert(meta.unique_name.clone(), idx);
        self.graph[idx] = meta;
        Ok(())
    }

    /// Remove a node and its incident edges. `petgraph` swap-removes the
    /// backing storage, so the id->index map is repaired for whichever
    /// node (if any) got moved into the freed slot.
    pub fn remove_node(&mut self, id: &str) -> Result<()> {
        let idx = self.node_index(id)?;
        self.index.remove(id);
        self.graph.remove_node(idx);
        if let Some(meta) = self.graph.node_weight(idx) {
            let moved_id = meta.unique_name.clone();
            self.index.insert(moved_id, idx);
        }
        Ok(())
    }

    /// Render the graph as Graphviz dot and write it to `path`, for
    /// diagnostics (§4.4).
    pub fn dump_dot(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, format!("{:?}", petgraph::dot::Dot::new(&self.graph)))
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}
