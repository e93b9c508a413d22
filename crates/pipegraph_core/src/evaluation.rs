// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph evaluation and execution.
//!
//! The frame driver calls [`Graph::evaluate`] once per frame. Nodes are
//! evaluated producers-first; each node sees its inputs resolved from
//! literals or from its producers' cached outputs, and only the node
//! itself writes its own output cache.

use crate::backend::{BackendError, RenderBackend};
use crate::dependency::Input;
use crate::graph::{Graph, GraphError};
use crate::node::NodeId;
use crate::shader::ShaderError;
use crate::value::{Value, ValueKind};
use indexmap::IndexMap;
use tracing::trace;

/// Values produced by one node evaluation
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    values: IndexMap<String, Value>,
}

impl NodeOutput {
    /// Create a new empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Output with a single named value
    pub fn single(name: impl Into<String>, value: Value) -> Self {
        let mut output = Self::new();
        output.set(name, value);
        output
    }

    /// Set an output value
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Get an output value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub(crate) fn into_values(self) -> impl Iterator<Item = (String, Value)> {
        self.values.into_iter()
    }
}

/// Inputs of one node, resolved for the current frame
#[derive(Debug, Clone)]
pub struct ResolvedInputs {
    node: String,
    values: IndexMap<String, Value>,
}

impl ResolvedInputs {
    /// Create an empty set for the named node
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            values: IndexMap::new(),
        }
    }

    /// Add a resolved value
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Name of the node being evaluated
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Get an input value, if it resolved
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get an input value or fail the frame
    pub fn require(&self, name: &str) -> Result<&Value, EvaluationError> {
        self.get(name).ok_or_else(|| EvaluationError::MissingInput {
            node: self.node.clone(),
            input: name.to_string(),
        })
    }

    /// Get a required input and convert it, failing on a kind mismatch
    pub fn require_as<'a, T>(
        &'a self,
        name: &str,
        expected: ValueKind,
        convert: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<T, EvaluationError> {
        let value = self.require(name)?;
        convert(value).ok_or_else(|| EvaluationError::TypeMismatch {
            node: self.node.clone(),
            name: name.to_string(),
            expected,
            found: value.kind(),
        })
    }

    /// All resolved values in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Per-frame context handed to every node evaluation
pub struct FrameContext<'a> {
    /// Shared render backend
    pub backend: &'a mut dyn RenderBackend,
    /// Frame counter
    pub frame: u64,
}

impl<'a> FrameContext<'a> {
    /// Create a frame context
    pub fn new(backend: &'a mut dyn RenderBackend, frame: u64) -> Self {
        Self { backend, frame }
    }
}

impl Graph {
    /// Evaluate every node reachable from the sink, producers first
    pub fn evaluate(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), EvaluationError> {
        let order = self.evaluation_order()?;
        self.evaluate_order(&order, ctx)
    }

    pub(crate) fn evaluate_order(
        &mut self,
        order: &[NodeId],
        ctx: &mut FrameContext<'_>,
    ) -> Result<(), EvaluationError> {
        for id in order {
            let inputs = self.resolve_inputs(*id)?;
            let node = self
                .node_mut(*id)
                .ok_or(GraphError::UnknownNode(*id))?;
            trace!(node = inputs.node(), frame = ctx.frame, "evaluating");
            let output = node.evaluate(&inputs, ctx)?;
            node.store_outputs(inputs.node(), output)?;
        }
        Ok(())
    }

    /// Resolve a node's inputs from literals and producer caches.
    ///
    /// A link whose producer has not published a value is left out; the
    /// node decides whether that input is required.
    pub fn resolve_inputs(&self, id: NodeId) -> Result<ResolvedInputs, EvaluationError> {
        let node = self.node(id).ok_or(GraphError::UnknownNode(id))?;
        let name = self.find_node(id).unwrap_or_default();
        let mut resolved = ResolvedInputs::new(name);

        for (input_name, input) in node.inputs() {
            match input {
                Input::Value(value) => {
                    resolved.values.insert(input_name.to_string(), value.clone());
                }
                Input::Link {
                    dependency,
                    expects,
                } => {
                    let producer = self
                        .node(dependency.node)
                        .ok_or(GraphError::UnknownNode(dependency.node))?;
                    let Some(value) = producer
                        .output(&dependency.output)
                        .and_then(|slot| slot.value())
                    else {
                        continue;
                    };
                    if !value.kind().can_connect_to(expects) {
                        return Err(EvaluationError::TypeMismatch {
                            node: name.to_string(),
                            name: input_name.to_string(),
                            expected: *expects,
                            found: value.kind(),
                        });
                    }
                    resolved.values.insert(input_name.to_string(), value.clone());
                }
            }
        }
        Ok(resolved)
    }
}

/// Error during evaluation
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// Graph is not in an evaluable state
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Missing required input
    #[error("Missing required input {input} on {node}")]
    MissingInput {
        /// Node name
        node: String,
        /// Input name
        input: String,
    },

    /// Type mismatch
    #[error("{node}: {name} expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Node name
        node: String,
        /// Input or output name
        name: String,
        /// Expected kind
        expected: ValueKind,
        /// Actual kind
        found: ValueKind,
    },

    /// Node produced an output it does not declare
    #[error("{node} produced undeclared output {output}")]
    UndeclaredOutput {
        /// Node name
        node: String,
        /// Output name
        output: String,
    },

    /// Backend failure
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Program could not be assembled
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::dependency::{Dependency, CANONICAL_OUTPUT};
    use crate::nodes::ConstantNode;

    #[test]
    fn test_inputs_resolve_from_producer_cache() {
        let mut graph = Graph::new();
        let a = graph
            .insert(
                "A",
                ConstantNode::new()
                    .with(CANONICAL_OUTPUT, Value::Float(2.5))
                    .into_node(),
                &[],
            )
            .unwrap();
        let out = ConstantNode::new()
            .with(CANONICAL_OUTPUT, Value::Int(1))
            .into_node()
            .with_input("x", Input::link(Dependency::canonical(a), ValueKind::Float))
            .with_input("literal", Value::Bool(true));
        let out = graph.insert("out", out, &[]).unwrap();
        graph.validate().unwrap();

        // Nothing published yet
        let before = graph.resolve_inputs(out).unwrap();
        assert!(before.get("x").is_none());
        assert_eq!(before.get("literal"), Some(&Value::Bool(true)));

        let mut backend = HeadlessBackend::default();
        graph.evaluate(&mut FrameContext::new(&mut backend, 0)).unwrap();

        let after = graph.resolve_inputs(out).unwrap();
        assert_eq!(after.get("x"), Some(&Value::Float(2.5)));
        assert_eq!(
            graph.get("out").unwrap().output(CANONICAL_OUTPUT).unwrap().value(),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn test_evaluate_requires_validation() {
        let mut graph = Graph::new();
        graph
            .insert("out", ConstantNode::new().into_node(), &[])
            .unwrap();
        let mut backend = HeadlessBackend::default();
        let err = graph
            .evaluate(&mut FrameContext::new(&mut backend, 0))
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Graph(GraphError::NotValidated)));
    }

    #[test]
    fn test_require_reports_node_and_input() {
        let inputs = ResolvedInputs::new("blur").with("amount", Value::Float(1.0));
        assert!(inputs.require("amount").is_ok());
        let err = inputs.require("radius").unwrap_err();
        assert_eq!(err.to_string(), "Missing required input radius on blur");
        assert!(matches!(
            inputs.require_as("amount", ValueKind::Camera, Value::as_camera),
            Err(EvaluationError::TypeMismatch { .. })
        ));
    }
}
