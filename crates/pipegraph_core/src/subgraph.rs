// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graphs embedded as nodes of other graphs.

use crate::dependency::{Dependency, CANONICAL_OUTPUT};
use crate::evaluation::{EvaluationError, FrameContext, NodeOutput, ResolvedInputs};
use crate::graph::{Graph, GraphError};
use crate::node::{kinds, Node, NodeBehavior, NodeId};
use crate::value::ValueKind;
use indexmap::IndexMap;

/// Inner node standing for an input of the enclosing sub-graph node.
/// Never evaluated: the sub-graph writes its output before each inner
/// evaluation.
#[derive(Debug, Clone, Copy, Default)]
struct PortalNode;

impl NodeBehavior for PortalNode {
    fn evaluate(
        &mut self,
        _inputs: &ResolvedInputs,
        _ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError> {
        Ok(NodeOutput::new())
    }
}

/// A graph with a fixed set of externally visible outputs.
///
/// Producers bound to an exposed output are marked in the inner graph so
/// that optimization passes never remove or redirect them.
#[derive(Debug, Default)]
pub struct SubGraph {
    graph: Graph,
    inputs: IndexMap<String, NodeId>,
    outputs: IndexMap<String, Dependency>,
}

impl SubGraph {
    /// Create an empty sub-graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Inner graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Inner graph, for inserting nodes and running optimizations
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Declare an input of the embedding node.
    ///
    /// Creates an inner portal node under `name` whose canonical output
    /// carries the outer input's value; `consumers` follows the same rule
    /// as [`Graph::insert`] children.
    pub fn expose_input(
        &mut self,
        name: &str,
        kind: ValueKind,
        consumers: &[&str],
    ) -> Result<NodeId, GraphError> {
        let portal = Node::new(kinds::PORTAL, PortalNode).with_output(CANONICAL_OUTPUT, kind);
        let id = self.graph.insert(name, portal, consumers)?;
        self.inputs.insert(name.to_string(), id);
        Ok(id)
    }

    /// Bind an inner producer output to an external output name
    pub fn expose_output(
        &mut self,
        name: impl Into<String>,
        dependency: Dependency,
    ) -> Result<(), GraphError> {
        let producer = self
            .graph
            .node(dependency.node)
            .ok_or(GraphError::UnknownNode(dependency.node))?;
        if producer.output(&dependency.output).is_none() {
            return Err(GraphError::MissingOutput {
                producer: self
                    .graph
                    .find_node(dependency.node)
                    .unwrap_or_default()
                    .to_string(),
                output: dependency.output,
            });
        }
        self.graph.mark_exported(dependency.node);
        self.outputs.insert(name.into(), dependency);
        Ok(())
    }

    /// Exposed outputs
    pub fn outputs(&self) -> &IndexMap<String, Dependency> {
        &self.outputs
    }

    /// Validate the inner graph from its exposed outputs
    pub fn validate(&mut self) -> Result<(), GraphError> {
        self.graph.validate()
    }

    /// Embed into a node; one output per exposed output
    pub fn into_node(self, kind: impl Into<String>) -> Result<Node, GraphError> {
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (name, dependency) in &self.outputs {
            let slot = self
                .graph
                .node(dependency.node)
                .and_then(|node| node.output(&dependency.output))
                .ok_or(GraphError::UnknownNode(dependency.node))?;
            outputs.push((name.clone(), slot.kind));
        }
        Ok(outputs
            .into_iter()
            .fold(Node::new(kind, self), |node, (name, kind)| {
                node.with_output(name, kind)
            }))
    }
}

impl NodeBehavior for SubGraph {
    fn evaluate(
        &mut self,
        inputs: &ResolvedInputs,
        ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError> {
        for (name, portal) in &self.inputs {
            let value = inputs.require(name)?.clone();
            if let Some(node) = self.graph.node_mut(*portal) {
                node.store_outputs(name, NodeOutput::single(CANONICAL_OUTPUT, value))?;
            }
        }

        if !self.graph.is_valid() {
            self.graph.validate()?;
        }
        let mut order = self.graph.evaluation_order()?;
        order.retain(|id| !self.inputs.values().any(|portal| portal == id));
        self.graph.evaluate_order(&order, ctx)?;

        let mut output = NodeOutput::new();
        for (name, dependency) in &self.outputs {
            let value = self
                .graph
                .node(dependency.node)
                .and_then(|node| node.output(&dependency.output))
                .and_then(|slot| slot.value());
            if let Some(value) = value {
                output.set(name.clone(), value.clone());
            }
        }
        Ok(output)
    }
}
