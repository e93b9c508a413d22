// SPDX-License-Identifier: MIT OR Apache-2.0
//! Directed acyclic graph of named render nodes.
//!
//! Nodes live in an arena keyed by [`NodeId`]; edges are the `Dependency`
//! links stored in each node's inputs, mirrored by a reverse index so the
//! consumers of a node can be found without scanning the whole graph.
//! Acyclicity is checked by [`Graph::validate`], which must be re-run after
//! every mutation before the graph can be evaluated.

use crate::dependency::{Dependency, Input};
use crate::node::{Node, NodeId};
use crate::value::ValueKind;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use tracing::debug;

/// Name that designates the sink node on insertion
pub const SINK_NAME: &str = "out";

/// A render pipeline graph
#[derive(Debug, Default)]
pub struct Graph {
    /// Name to node lookup
    names: IndexMap<String, NodeId>,
    /// Node arena
    nodes: IndexMap<NodeId, Node>,
    /// Reverse lookup for [`Graph::find_node`]
    labels: HashMap<NodeId, String>,
    /// Reverse edge index: producer -> consumers
    dependents: HashMap<NodeId, IndexSet<NodeId>>,
    /// Consumer names declared at insertion time
    declared_children: HashMap<NodeId, Vec<String>>,
    /// Designated sink
    sink: Option<NodeId>,
    /// Producers bound to externally visible outputs
    exported: IndexSet<NodeId>,
    /// Set by a successful [`Graph::validate`]
    valid: bool,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the last validation succeeded and nothing changed since
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Register a node under `name`.
    ///
    /// `children` names the nodes that will consume this one. Every node
    /// but the first must either depend on an existing node or declare at
    /// least one child; orphans are rejected without touching the graph.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        node: Node,
        children: &[&str],
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateName(name));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(name));
        }
        if !self.is_empty() && node.dependencies().next().is_none() && children.is_empty() {
            return Err(GraphError::OrphanNode(name));
        }
        for (input, dependency) in node.dependencies() {
            self.check_link(&name, input, dependency, expected_kind(&node, input))?;
        }

        let id = node.id;
        if !children.is_empty() {
            self.declared_children
                .insert(id, children.iter().map(|c| (*c).to_string()).collect());
        }
        if name == SINK_NAME {
            self.sink = Some(id);
        }
        debug!(node = %name, kind = %node.kind, "inserting node");
        self.attach(name, node);
        Ok(id)
    }

    /// Add or rewire one link input on a node already in the graph
    pub fn connect(
        &mut self,
        consumer: &str,
        input: &str,
        dependency: Dependency,
        expects: ValueKind,
    ) -> Result<(), GraphError> {
        let consumer_id = *self
            .names
            .get(consumer)
            .ok_or_else(|| GraphError::NodeNotFound(consumer.to_string()))?;
        self.check_link(consumer, input, &dependency, Some(expects))?;

        let producer = dependency.node;
        let node = self
            .nodes
            .get_mut(&consumer_id)
            .ok_or_else(|| GraphError::NodeNotFound(consumer.to_string()))?;
        let previous = node
            .inputs_mut()
            .insert(input.to_string(), Input::link(dependency, expects));

        if let Some(old) = previous.as_ref().and_then(Input::dependency) {
            let old_producer = old.node;
            if !node.depends_on(old_producer) {
                if let Some(consumers) = self.dependents.get_mut(&old_producer) {
                    consumers.shift_remove(&consumer_id);
                }
            }
        }
        self.dependents.entry(producer).or_default().insert(consumer_id);
        self.valid = false;
        Ok(())
    }

    /// Remove a node. Links from other nodes to it are left dangling and
    /// will fail validation until rewired.
    pub fn remove(&mut self, name: &str) -> Result<Node, GraphError> {
        let id = *self
            .names
            .get(name)
            .ok_or_else(|| GraphError::NodeNotFound(name.to_string()))?;
        let node = self
            .detach(id)
            .ok_or_else(|| GraphError::NodeNotFound(name.to_string()))?;
        self.exported.shift_remove(&id);
        if self.sink == Some(id) {
            self.sink = None;
        }
        Ok(node)
    }

    /// Replace the nodes `removed` by `node` registered under `name`.
    ///
    /// Consumers of any removed node outside the removed set are relinked
    /// to the replacement, keeping their output names. If the sink was
    /// removed, the replacement becomes the sink. A node bound to an
    /// exported output may only be replaced by a node keeping its identity.
    pub fn splice(
        &mut self,
        removed: &[NodeId],
        name: impl Into<String>,
        node: Node,
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        if let Some(existing) = self.names.get(&name) {
            if !removed.contains(existing) {
                return Err(GraphError::DuplicateName(name));
            }
        }
        if self.nodes.contains_key(&node.id) && !removed.contains(&node.id) {
            return Err(GraphError::DuplicateNode(name));
        }
        for (input, dependency) in node.dependencies() {
            if removed.contains(&dependency.node) {
                return Err(GraphError::UnknownProducer {
                    consumer: name.clone(),
                    input: input.to_string(),
                });
            }
            self.check_link(&name, input, dependency, expected_kind(&node, input))?;
        }

        let mut external = IndexSet::new();
        for id in removed {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::UnknownNode(*id));
            }
            if *id != node.id && self.exported.contains(id) {
                let label = self.labels.get(id).cloned().unwrap_or_else(|| id.to_string());
                return Err(GraphError::ExportedNode(label));
            }
            if let Some(consumers) = self.dependents.get(id) {
                external.extend(consumers.iter().filter(|c| !removed.contains(c)).copied());
            }
        }
        let replaces_sink = self.sink.is_some_and(|sink| removed.contains(&sink));

        for id in removed {
            self.detach(*id);
        }
        let new_id = node.id;
        self.attach(name, node);

        for consumer in external {
            if let Some(node) = self.nodes.get_mut(&consumer) {
                for input in node.inputs_mut().values_mut() {
                    if let Input::Link { dependency, .. } = input {
                        if removed.contains(&dependency.node) {
                            dependency.node = new_id;
                        }
                    }
                }
            }
            self.dependents.entry(new_id).or_default().insert(consumer);
        }
        if replaces_sink {
            self.sink = Some(new_id);
        }
        Ok(new_id)
    }

    /// Designate the sink node
    pub fn set_sink(&mut self, name: &str) -> Result<(), GraphError> {
        let id = *self
            .names
            .get(name)
            .ok_or_else(|| GraphError::NodeNotFound(name.to_string()))?;
        self.sink = Some(id);
        self.valid = false;
        Ok(())
    }

    /// The sink node, if designated
    pub fn sink(&self) -> Option<NodeId> {
        self.sink
    }

    /// Get a node by name
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.names.get(name).and_then(|id| self.nodes.get(id))
    }

    /// Get a node by ID
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get all registered names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    /// Reverse lookup from node identity to its registered name
    pub fn find_node(&self, id: NodeId) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// All nodes with an input linked to one of `id`'s outputs
    pub fn find_dependants(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.dependents
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|consumer| self.nodes.get(consumer))
    }

    /// Consumer names declared when `id` was inserted
    pub fn declared_children(&self, id: NodeId) -> &[String] {
        self.declared_children.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Whether `id` feeds an externally visible output
    pub fn is_exported(&self, id: NodeId) -> bool {
        self.exported.contains(&id)
    }

    pub(crate) fn mark_exported(&mut self, id: NodeId) {
        self.exported.insert(id);
        self.valid = false;
    }

    /// Check that the graph reachable from the sink (and any exported
    /// producers) is acyclic.
    ///
    /// Depth-first traversal threading the set of nodes on the current
    /// path; a dependency already on the path closes a cycle. Never
    /// mutates the topology.
    pub fn validate(&mut self) -> Result<(), GraphError> {
        self.valid = false;
        let roots = self.roots();
        if roots.is_empty() {
            return Err(GraphError::NoSink);
        }

        let mut path = IndexSet::new();
        let mut done = HashSet::new();
        for root in roots {
            self.check_acyclic(root, &mut path, &mut done)?;
        }
        self.valid = true;
        Ok(())
    }

    fn check_acyclic(
        &self,
        id: NodeId,
        path: &mut IndexSet<NodeId>,
        done: &mut HashSet<NodeId>,
    ) -> Result<(), GraphError> {
        if done.contains(&id) {
            return Ok(());
        }
        let node = self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))?;
        path.insert(id);

        for (_, dependency) in node.dependencies() {
            if let Some(start) = path.get_index_of(&dependency.node) {
                return Err(GraphError::Cycle(self.cycle_error(path, start, dependency.node, id)));
            }
        }
        for (_, dependency) in node.dependencies() {
            self.check_acyclic(dependency.node, path, done)?;
        }

        path.pop();
        done.insert(id);
        Ok(())
    }

    fn cycle_error(
        &self,
        path: &IndexSet<NodeId>,
        start: usize,
        producer: NodeId,
        consumer: NodeId,
    ) -> CycleError {
        // The path lists consumers before producers; reverse for data-flow order.
        let mut cycle: Vec<String> = path
            .iter()
            .skip(start)
            .rev()
            .map(|id| self.label(*id))
            .collect();
        if let Some(first) = cycle.first().cloned() {
            cycle.push(first);
        }
        CycleError {
            producer: self.label(producer),
            consumer: self.label(consumer),
            cycle,
        }
    }

    /// Nodes reachable from the sink, producers before consumers
    pub fn evaluation_order(&self) -> Result<Vec<NodeId>, GraphError> {
        if !self.valid {
            return Err(GraphError::NotValidated);
        }
        Ok(self.order_from(&self.roots()))
    }

    pub(crate) fn order_from(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            self.post_order(*root, &mut visited, &mut order);
        }
        order
    }

    fn post_order(&self, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(node) = self.nodes.get(&id) {
            for (_, dependency) in node.dependencies() {
                self.post_order(dependency.node, visited, order);
            }
        }
        order.push(id);
    }

    pub(crate) fn roots(&self) -> Vec<NodeId> {
        self.sink.into_iter().chain(self.exported.iter().copied()).collect()
    }

    /// Graphviz rendering of the graph, producers pointing at consumers
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph pipeline {\n");
        for (name, id) in &self.names {
            let kind = self.nodes.get(id).map_or("?", |n| n.kind.as_str());
            let shape = if self.sink == Some(*id) { "doublecircle" } else { "box" };
            let _ = writeln!(dot, "  \"{name}\" [label=\"{name}\\n{kind}\", shape={shape}];");
        }
        for (name, id) in &self.names {
            let Some(node) = self.nodes.get(id) else { continue };
            for (input, dependency) in node.dependencies() {
                let producer = self.label(dependency.node);
                let _ = writeln!(
                    dot,
                    "  \"{producer}\" -> \"{name}\" [label=\"{}:{input}\"];",
                    dependency.output
                );
            }
        }
        dot.push('}');
        dot
    }

    fn label(&self, id: NodeId) -> String {
        self.labels.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn check_link(
        &self,
        consumer: &str,
        input: &str,
        dependency: &Dependency,
        expects: Option<ValueKind>,
    ) -> Result<(), GraphError> {
        let producer = self
            .nodes
            .get(&dependency.node)
            .ok_or_else(|| GraphError::UnknownProducer {
                consumer: consumer.to_string(),
                input: input.to_string(),
            })?;
        let slot = producer
            .output(&dependency.output)
            .ok_or_else(|| GraphError::MissingOutput {
                producer: self.label(dependency.node),
                output: dependency.output.clone(),
            })?;
        if let Some(expects) = expects {
            if !slot.kind.can_connect_to(&expects) {
                return Err(GraphError::IncompatibleKinds {
                    consumer: consumer.to_string(),
                    input: input.to_string(),
                    expected: expects,
                    found: slot.kind,
                });
            }
        }
        Ok(())
    }

    fn attach(&mut self, name: String, node: Node) {
        let id = node.id;
        for (_, dependency) in node.dependencies() {
            self.dependents.entry(dependency.node).or_default().insert(id);
        }
        self.names.insert(name.clone(), id);
        self.labels.insert(id, name);
        self.nodes.insert(id, node);
        self.valid = false;
    }

    fn detach(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.shift_remove(&id)?;
        for (_, dependency) in node.dependencies() {
            if let Some(consumers) = self.dependents.get_mut(&dependency.node) {
                consumers.shift_remove(&id);
            }
        }
        self.dependents.remove(&id);
        self.declared_children.remove(&id);
        if let Some(name) = self.labels.remove(&id) {
            self.names.shift_remove(&name);
        }
        self.valid = false;
        Some(node)
    }
}

fn expected_kind(node: &Node, input: &str) -> Option<ValueKind> {
    match node.input(input) {
        Some(Input::Link { expects, .. }) => Some(*expects),
        _ => None,
    }
}

/// Structural graph errors
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No node with this name
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A link or operation references a node that is not in the graph
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Name already registered
    #[error("Duplicate node name: {0}")]
    DuplicateName(String),

    /// Node identity already registered under another name
    #[error("Node already registered, cannot insert it again as {0}")]
    DuplicateNode(String),

    /// Node with no dependencies and no declared children
    #[error("Orphan node rejected: {0} has no dependencies and no children")]
    OrphanNode(String),

    /// Link to a producer that is not in the graph
    #[error("Input {input} of {consumer} links to a node outside the graph")]
    UnknownProducer {
        /// Consumer name
        consumer: String,
        /// Input name
        input: String,
    },

    /// Link to an output the producer does not declare
    #[error("Node {producer} has no output named {output}")]
    MissingOutput {
        /// Producer name
        producer: String,
        /// Output name
        output: String,
    },

    /// Producer output kind cannot feed the consumer input
    #[error("Input {input} of {consumer} expects {expected:?}, producer gives {found:?}")]
    IncompatibleKinds {
        /// Consumer name
        consumer: String,
        /// Input name
        input: String,
        /// Kind the input expects
        expected: ValueKind,
        /// Kind the producer declares
        found: ValueKind,
    },

    /// Dependency cycle reachable from the sink
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Neither a sink nor exported outputs to validate from
    #[error("Graph has no sink node")]
    NoSink,

    /// Splice would delete a node bound to an exported output
    #[error("Node {0} is bound to an exported output and cannot be removed")]
    ExportedNode(String),

    /// Operation requires a validated graph
    #[error("Graph must be validated first")]
    NotValidated,
}

/// A dependency cycle, reported with the edge that closed it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cycle detected: {} (closed by {producer} -> {consumer})", cycle.join(" -> "))]
pub struct CycleError {
    /// Producer side of the closing edge
    pub producer: String,
    /// Consumer side of the closing edge
    pub consumer: String,
    /// Node names in data-flow order, first == last
    pub cycle: Vec<String>,
}
