// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern-driven graph rewriting.
//!
//! An [`Optimization`] declares a linear chain of node type tags and a
//! fusion operation. The [`Optimizer`] scans the graph for chains whose
//! tags match, asks the pass for a replacement node, splices it in and
//! re-validates, repeating until nothing matches.

mod merge;
pub mod rename;

pub use merge::{ScreenShaderMerge, PARENT_PREFIX};

use crate::config::OptimizerConfig;
use crate::graph::{Graph, GraphError};
use crate::node::{Node, NodeId};
use crate::shader::ShaderError;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Reason a matched chain could not be fused
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// Chain does not have the length the pass expects
    #[error("Expected a chain of {expected} nodes, found {found}")]
    ChainLength {
        /// Pattern length
        expected: usize,
        /// Matched nodes
        found: usize,
    },

    /// A matched node is not a shader pass
    #[error("Node {0} is not a shader pass")]
    NotAShader(String),

    /// Child and parent draw with different render contexts
    #[error("Child and parent use different renderers")]
    RendererMismatch,

    /// Parent output is consumed by more than the child
    #[error("Parent has {count} dependents")]
    MultipleDependents {
        /// Number of dependents
        count: usize,
    },

    /// Child reads the parent output through a user input
    #[error("Child reads the parent output through input {input}")]
    ParentReferenced {
        /// Input name on the child
        input: String,
    },

    /// Child samples its input away from the canonical coordinate
    #[error("Child samples its input at an offset: {sample}")]
    OffsetSampling {
        /// The offending sample expression
        sample: String,
    },

    /// Child reads its input other than through a plain sample at the
    /// canonical coordinate in its main body
    #[error("Child reads its input through {sample}, which cannot be redirected to the parent")]
    InputRead {
        /// The offending sample expression
        sample: String,
    },

    /// Parent feeds an externally visible output
    #[error("Parent output is externally exposed")]
    ExportedOutput,

    /// Both sides define the same name differently
    #[error("Define {name} is {child} in the child but {parent} in the parent")]
    DefineConflict {
        /// Define name
        name: String,
        /// Child value
        child: String,
        /// Parent value
        parent: String,
    },

    /// Identifier rewriting failed
    #[error("Rename failed: {0}")]
    Rename(#[from] regex::Error),

    /// Fused parts do not assemble
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// Error aborting an optimizer run
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    /// Graph failed validation before or after a rewrite
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// A declarative rewrite: a chain pattern and the fusion producing its
/// replacement
pub trait Optimization {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Type tags, child first; each entry is the primary producer of the
    /// previous one
    fn pattern(&self) -> &[String];

    /// Build one node replacing `chain` (child to parent order).
    ///
    /// Must not assume the graph will accept the result; any error leaves
    /// the graph untouched.
    fn apply(&self, chain: &[&Node], graph: &Graph) -> Result<Node, FusionError>;
}

/// One applied rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// Pass that produced it
    pub pass: String,
    /// Names of the removed nodes, child first
    pub removed: Vec<String>,
    /// Name of the replacement
    pub inserted: String,
}

/// Outcome of an optimizer run
#[derive(Debug, Clone, Default)]
pub struct OptimizeReport {
    /// Rewrites in application order
    pub rewrites: Vec<Rewrite>,
    /// Matched chains the pass declined
    pub rejected: usize,
}

impl OptimizeReport {
    /// Number of nodes removed from the graph
    pub fn nodes_removed(&self) -> usize {
        self.rewrites
            .iter()
            .map(|rewrite| rewrite.removed.len().saturating_sub(1))
            .sum()
    }
}

/// Runs optimization passes over a graph
pub struct Optimizer {
    passes: Vec<Box<dyn Optimization>>,
    config: OptimizerConfig,
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field(
                "passes",
                &self.passes.iter().map(|pass| pass.name()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}

impl Optimizer {
    /// Create an optimizer with no passes
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            passes: Vec::new(),
            config,
        }
    }

    /// Optimizer with the built-in passes
    pub fn standard(config: OptimizerConfig) -> Self {
        Self::new(config).with_pass(ScreenShaderMerge::new())
    }

    /// Register a pass
    pub fn with_pass(mut self, pass: impl Optimization + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Apply passes until no pattern matches or the rewrite cap is hit.
    ///
    /// Declined candidates are skipped until the next successful rewrite,
    /// which may change the facts they were declined on.
    pub fn run(&self, graph: &mut Graph) -> Result<OptimizeReport, OptimizeError> {
        let mut report = OptimizeReport::default();
        if !self.config.enabled || self.passes.is_empty() {
            return Ok(report);
        }
        graph.validate()?;

        let mut declined: HashSet<Vec<NodeId>> = HashSet::new();
        'scan: loop {
            if report.rewrites.len() >= self.config.max_rewrites {
                warn!(max_rewrites = self.config.max_rewrites, "rewrite limit reached");
                break;
            }

            for pass in &self.passes {
                let candidates: Vec<NodeId> = graph.node_ids().collect();
                for start in candidates {
                    let Some(chain) = match_chain(graph, start, pass.pattern()) else {
                        continue;
                    };
                    if declined.contains(&chain) {
                        continue;
                    }

                    let nodes: Vec<&Node> = chain.iter().filter_map(|id| graph.node(*id)).collect();
                    let replacement = match pass.apply(&nodes, graph) {
                        Ok(node) => node,
                        Err(reason) => {
                            debug!(pass = pass.name(), chain = ?chain_names(graph, &chain), %reason, "fusion declined");
                            declined.insert(chain);
                            report.rejected += 1;
                            continue;
                        }
                    };

                    let removed = chain_names(graph, &chain);
                    let name = composite_name(graph, &removed, &chain);
                    if let Err(reason) = graph.splice(&chain, name.clone(), replacement) {
                        debug!(pass = pass.name(), chain = ?removed, %reason, "replacement rejected by graph");
                        declined.insert(chain);
                        report.rejected += 1;
                        continue;
                    }
                    graph.validate()?;

                    info!(pass = pass.name(), removed = ?removed, inserted = %name, "applied rewrite");
                    report.rewrites.push(Rewrite {
                        pass: pass.name().to_string(),
                        removed,
                        inserted: name,
                    });
                    declined.clear();
                    continue 'scan;
                }
            }
            break;
        }

        Ok(report)
    }
}

/// Walk primary dependencies from `start`, matching each node's type tag
/// against the next pattern entry. Returns the chain child first.
pub fn match_chain(graph: &Graph, start: NodeId, pattern: &[String]) -> Option<Vec<NodeId>> {
    let (last, rest) = pattern.split_last()?;
    let mut chain = Vec::with_capacity(pattern.len());
    let mut current = graph.node(start)?;

    for tag in rest {
        if current.kind != *tag {
            return None;
        }
        chain.push(current.id);
        let parent = current.primary_dependency()?.node;
        if chain.contains(&parent) {
            return None;
        }
        current = graph.node(parent)?;
    }

    if current.kind != *last {
        return None;
    }
    chain.push(current.id);
    Some(chain)
}

fn chain_names(graph: &Graph, chain: &[NodeId]) -> Vec<String> {
    chain
        .iter()
        .map(|id| graph.find_node(*id).map_or_else(|| id.to_string(), str::to_string))
        .collect()
}

/// `child+parent`, suffixed when another node already holds the name
fn composite_name(graph: &Graph, names: &[String], chain: &[NodeId]) -> String {
    let base = names.join("+");
    let free = |name: &str| {
        graph
            .get(name)
            .map_or(true, |node| chain.contains(&node.id))
    };

    let mut name = base.clone();
    let mut suffix = 1;
    while !free(&name) {
        name = format!("{base}#{suffix}");
        suffix += 1;
    }
    name
}
