// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dependency (edge) definitions for the graph.

use crate::node::NodeId;
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};

/// Output name every node exposes as its default result
pub const CANONICAL_OUTPUT: &str = "output";

/// A directed edge: one named output of a producer node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Producer node
    pub node: NodeId,
    /// Output name on the producer
    pub output: String,
}

impl Dependency {
    /// Create a new dependency
    pub fn new(node: NodeId, output: impl Into<String>) -> Self {
        Self {
            node,
            output: output.into(),
        }
    }

    /// Dependency on the canonical output of a node
    pub fn canonical(node: NodeId) -> Self {
        Self::new(node, CANONICAL_OUTPUT)
    }

    /// Check if this dependency points at a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.node == node_id
    }
}

/// A named input of a node: a literal or a link to a producer output
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Literal value
    Value(Value),
    /// Edge to a producer output
    Link {
        /// Producer output
        dependency: Dependency,
        /// Kind the consumer expects
        expects: ValueKind,
    },
}

impl Input {
    /// Create a link input
    pub fn link(dependency: Dependency, expects: ValueKind) -> Self {
        Self::Link {
            dependency,
            expects,
        }
    }

    /// Get the dependency, if this input is a link
    pub fn dependency(&self) -> Option<&Dependency> {
        match self {
            Self::Link { dependency, .. } => Some(dependency),
            Self::Value(_) => None,
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}
