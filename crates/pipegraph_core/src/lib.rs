// SPDX-License-Identifier: MIT OR Apache-2.0
//! Render pipelines as graphs of typed nodes.
//!
//! A pipeline is a DAG of nodes (view setup, render passes, full-screen
//! shader effects) linked through typed outputs. It is built once,
//! validated, optimized once and then evaluated every frame.
//!
//! ## Architecture
//!
//! - [`graph`]: node arena, name table, cycle validation
//! - [`evaluation`]: per-frame input resolution and ordering
//! - [`shader`]: full-screen passes assembled from structured parts
//! - [`optimize`]: chain pattern matching and shader pass fusion
//! - [`backend`]: the rendering boundary, with a recording backend
//!
//! ```ignore
//! let mut graph = Graph::new();
//! // insert nodes, the one named "out" becomes the sink
//! graph.validate()?;
//! Optimizer::standard(config.optimizer).run(&mut graph)?;
//! graph.evaluate(&mut FrameContext::new(&mut backend, frame))?;
//! ```

pub mod backend;
pub mod config;
pub mod dependency;
pub mod evaluation;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod optimize;
pub mod shader;
pub mod subgraph;
pub mod value;

pub use backend::{BackendError, HeadlessBackend, RenderBackend};
pub use config::{ConfigError, PipelineConfig};
pub use dependency::{Dependency, Input, CANONICAL_OUTPUT};
pub use evaluation::{EvaluationError, FrameContext, NodeOutput, ResolvedInputs};
pub use graph::{CycleError, Graph, GraphError, SINK_NAME};
pub use node::{kinds, Node, NodeBehavior, NodeId};
pub use optimize::{FusionError, OptimizeError, OptimizeReport, Optimization, Optimizer};
pub use shader::{FragmentShaderParts, ShaderError, ShaderPass};
pub use subgraph::SubGraph;
pub use value::{Value, ValueKind};
