// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::dependency::{Dependency, Input};
use crate::evaluation::{EvaluationError, FrameContext, NodeOutput, ResolvedInputs};
use crate::shader::ShaderPass;
use crate::value::{Value, ValueKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Identifier-safe spelling, usable inside generated program text
    pub fn ident(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type tags of the stock node types
pub mod kinds {
    /// Node publishing fixed values
    pub const CONSTANT: &str = "Constant";
    /// Camera/view construction node
    pub const VIEW: &str = "View";
    /// Scene render pass node
    pub const SCENE_PASS: &str = "ScenePass";
    /// Full-screen shader pass node
    pub const SCREEN_SHADER: &str = "ScreenShader";
    /// Sub-graph input portal
    pub const PORTAL: &str = "Portal";
    /// Embedded sub-graph
    pub const SUB_GRAPH: &str = "SubGraph";
}

/// Per-frame behavior of a node
pub trait NodeBehavior: fmt::Debug {
    /// Evaluate the node from its resolved inputs and produce outputs
    fn evaluate(
        &mut self,
        inputs: &ResolvedInputs,
        ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError>;

    /// Input whose producer is this node's parent in a processing chain
    fn primary_input(&self) -> Option<&str> {
        None
    }

    /// Access the shader pass, for nodes that are full-screen shader passes
    fn as_shader(&self) -> Option<&ShaderPass> {
        None
    }
}

/// A cached output of a node
#[derive(Debug, Clone)]
pub struct OutputSlot {
    /// Declared kind
    pub kind: ValueKind,
    value: Option<Value>,
}

impl OutputSlot {
    /// Create an empty slot
    pub fn new(kind: ValueKind) -> Self {
        Self { kind, value: None }
    }

    /// Value from the most recent evaluation
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

/// A node instance in the graph
#[derive(Debug)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Type tag, matched by optimization patterns
    pub kind: String,
    inputs: IndexMap<String, Input>,
    outputs: IndexMap<String, OutputSlot>,
    behavior: Box<dyn NodeBehavior>,
}

impl Node {
    /// Create a node with a fresh ID
    pub fn new(kind: impl Into<String>, behavior: impl NodeBehavior + 'static) -> Self {
        Self {
            id: NodeId::new(),
            kind: kind.into(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            behavior: Box::new(behavior),
        }
    }

    /// Reuse an existing identity
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Add an input
    pub fn with_input(mut self, name: impl Into<String>, input: impl Into<Input>) -> Self {
        self.inputs.insert(name.into(), input.into());
        self
    }

    /// Declare an output
    pub fn with_output(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.outputs.insert(name.into(), OutputSlot::new(kind));
        self
    }

    /// Set or replace an input. Prefer [`crate::Graph::connect`] for links on
    /// nodes already in a graph, it keeps the reverse index in sync.
    pub fn set_input(&mut self, name: impl Into<String>, input: impl Into<Input>) {
        self.inputs.insert(name.into(), input.into());
    }

    /// Get an input by name
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    /// Get all inputs
    pub fn inputs(&self) -> impl Iterator<Item = (&str, &Input)> {
        self.inputs.iter().map(|(name, input)| (name.as_str(), input))
    }

    /// Get an output by name
    pub fn output(&self, name: &str) -> Option<&OutputSlot> {
        self.outputs.get(name)
    }

    /// Get all outputs
    pub fn outputs(&self) -> impl Iterator<Item = (&str, &OutputSlot)> {
        self.outputs.iter().map(|(name, slot)| (name.as_str(), slot))
    }

    /// Get all link inputs
    pub fn dependencies(&self) -> impl Iterator<Item = (&str, &Dependency)> {
        self.inputs
            .iter()
            .filter_map(|(name, input)| input.dependency().map(|dep| (name.as_str(), dep)))
    }

    /// Check if any input links to a node
    pub fn depends_on(&self, node_id: NodeId) -> bool {
        self.dependencies().any(|(_, dep)| dep.involves_node(node_id))
    }

    /// The dependency followed when walking a processing chain
    pub fn primary_dependency(&self) -> Option<&Dependency> {
        match self.behavior.primary_input() {
            Some(name) => self.input(name).and_then(Input::dependency),
            None => self.dependencies().next().map(|(_, dep)| dep),
        }
    }

    /// Shader pass of this node, if it is one
    pub fn as_shader(&self) -> Option<&ShaderPass> {
        self.behavior.as_shader()
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut IndexMap<String, Input> {
        &mut self.inputs
    }

    pub(crate) fn evaluate(
        &mut self,
        inputs: &ResolvedInputs,
        ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError> {
        self.behavior.evaluate(inputs, ctx)
    }

    /// Replace the output caches with one evaluation's results. Outputs
    /// the evaluation did not produce are left empty.
    pub(crate) fn store_outputs(
        &mut self,
        node: &str,
        output: NodeOutput,
    ) -> Result<(), EvaluationError> {
        for slot in self.outputs.values_mut() {
            slot.value = None;
        }
        for (name, value) in output.into_values() {
            let slot = self
                .outputs
                .get_mut(&name)
                .ok_or_else(|| EvaluationError::UndeclaredOutput {
                    node: node.to_string(),
                    output: name.clone(),
                })?;
            if !value.kind().can_connect_to(&slot.kind) {
                return Err(EvaluationError::TypeMismatch {
                    node: node.to_string(),
                    name,
                    expected: slot.kind,
                    found: value.kind(),
                });
            }
            slot.value = Some(value);
        }
        Ok(())
    }
}
