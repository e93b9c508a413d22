// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stock node types: constants, view construction and the scene pass.

use crate::dependency::{Dependency, Input, CANONICAL_OUTPUT};
use crate::evaluation::{EvaluationError, FrameContext, NodeOutput, ResolvedInputs};
use crate::node::{kinds, Node, NodeBehavior};
use crate::value::{CameraParams, RenderTarget, Value, ValueKind};
use indexmap::IndexMap;

/// Publishes fixed values every frame
#[derive(Debug, Clone, Default)]
pub struct ConstantNode {
    values: IndexMap<String, Value>,
    empty: IndexMap<String, ValueKind>,
}

impl ConstantNode {
    /// Create a constant node with no outputs
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output with a fixed value
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Declare an output that is never published
    pub fn with_empty(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.empty.insert(name.into(), kind);
        self
    }

    /// Wrap into a [`kinds::CONSTANT`] node
    pub fn into_node(self) -> Node {
        let outputs: Vec<(String, ValueKind)> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.kind()))
            .chain(self.empty.iter().map(|(name, kind)| (name.clone(), *kind)))
            .collect();
        outputs
            .into_iter()
            .fold(Node::new(kinds::CONSTANT, self), |node, (name, kind)| {
                node.with_output(name, kind)
            })
    }
}

impl NodeBehavior for ConstantNode {
    fn evaluate(
        &mut self,
        _inputs: &ResolvedInputs,
        _ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError> {
        let mut output = NodeOutput::new();
        for (name, value) in &self.values {
            output.set(name.clone(), value.clone());
        }
        Ok(output)
    }
}

/// Builds camera parameters from a viewport and a camera placement.
///
/// Both inputs are usually links whose values only exist once the graph
/// runs, so a missing one fails the frame rather than construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewNode;

impl ViewNode {
    /// Viewport size input, `Vec2([width, height])`
    pub const VIEWPORT: &'static str = "viewport";
    /// Camera placement input, `Vec2([near, far])`
    pub const PLACEMENT: &'static str = "placement";
    /// Camera output
    pub const CAMERA: &'static str = "camera";

    /// Create a view node from viewport and placement inputs
    pub fn node(viewport: impl Into<Input>, placement: impl Into<Input>) -> Node {
        Node::new(kinds::VIEW, ViewNode)
            .with_input(Self::VIEWPORT, viewport)
            .with_input(Self::PLACEMENT, placement)
            .with_output(Self::CAMERA, ValueKind::Camera)
    }
}

impl NodeBehavior for ViewNode {
    fn evaluate(
        &mut self,
        inputs: &ResolvedInputs,
        _ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError> {
        let [width, height] = inputs.require_as(Self::VIEWPORT, ValueKind::Vec2, Value::as_vec2)?;
        let [near, far] = inputs.require_as(Self::PLACEMENT, ValueKind::Vec2, Value::as_vec2)?;
        let camera = CameraParams {
            width: width.max(1.0) as u32,
            height: height.max(1.0) as u32,
            near,
            far,
        };
        Ok(NodeOutput::single(Self::CAMERA, Value::Camera(camera)))
    }
}

/// Renders the scene into a target sized to the view.
///
/// Stands in for the backend's scene rendering: it owns the target, makes
/// the view's clipping planes the active camera and clears the target.
#[derive(Debug, Clone, Default)]
pub struct ScenePassNode {
    target: Option<RenderTarget>,
}

impl ScenePassNode {
    /// Camera input
    pub const CAMERA: &'static str = "camera";
    /// Renderer input
    pub const RENDERER: &'static str = "renderer";

    /// Create a scene pass reading a view and a renderer
    pub fn node(camera: Dependency, renderer: Dependency) -> Node {
        Node::new(kinds::SCENE_PASS, ScenePassNode::default())
            .with_input(Self::CAMERA, Input::link(camera, ValueKind::Camera))
            .with_input(Self::RENDERER, Input::link(renderer, ValueKind::Renderer))
            .with_output(CANONICAL_OUTPUT, ValueKind::RenderTarget)
    }
}

impl NodeBehavior for ScenePassNode {
    fn evaluate(
        &mut self,
        inputs: &ResolvedInputs,
        ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError> {
        let camera = *inputs.require_as(Self::CAMERA, ValueKind::Camera, Value::as_camera)?;
        inputs.require_as(Self::RENDERER, ValueKind::Renderer, Value::as_renderer)?;

        let target = match self.target {
            Some(target) if target.width == camera.width && target.height == camera.height => {
                target
            }
            _ => {
                let target = ctx.backend.allocate_target(camera.width, camera.height, true);
                self.target = Some(target);
                target
            }
        };
        ctx.backend.set_camera_planes(camera.near, camera.far);
        ctx.backend.bind_target(Some(&target));
        ctx.backend.clear();
        Ok(NodeOutput::single(CANONICAL_OUTPUT, Value::RenderTarget(target)))
    }

    fn primary_input(&self) -> Option<&str> {
        Some(Self::CAMERA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, RenderBackend};
    use crate::graph::{Graph, SINK_NAME};
    use crate::value::RendererId;

    fn view_graph(viewport: Value) -> Graph {
        let mut graph = Graph::new();
        let sources = ConstantNode::new()
            .with("renderer", Value::Renderer(RendererId(0)))
            .with("placement", Value::Vec2([0.5, 200.0]))
            .into_node();
        let sources = graph.insert("sources", sources, &[]).unwrap();

        let view = ViewNode::node(
            viewport,
            Input::link(Dependency::new(sources, "placement"), ValueKind::Vec2),
        );
        let view = graph.insert("view", view, &[]).unwrap();
        graph
            .insert(
                SINK_NAME,
                ScenePassNode::node(
                    Dependency::new(view, ViewNode::CAMERA),
                    Dependency::new(sources, "renderer"),
                ),
                &[],
            )
            .unwrap();
        graph.validate().unwrap();
        graph
    }

    #[test]
    fn test_scene_pass_uses_view() {
        let mut graph = view_graph(Value::Vec2([640.0, 480.0]));
        let mut backend = HeadlessBackend::default();
        graph.evaluate(&mut FrameContext::new(&mut backend, 0)).unwrap();

        let out = graph.get(SINK_NAME).unwrap();
        let Some(Value::RenderTarget(target)) = out.output(CANONICAL_OUTPUT).unwrap().value() else {
            panic!("scene target missing");
        };
        assert_eq!((target.width, target.height), (640, 480));
        assert!(target.depth.is_some());
        assert_eq!(backend.camera_planes(), (0.5, 200.0));
    }

    #[test]
    fn test_view_missing_input_is_fatal_at_evaluation() {
        let mut graph = Graph::new();
        let sources = graph
            .insert(
                "sources",
                ConstantNode::new()
                    .with("renderer", Value::Renderer(RendererId(0)))
                    .with_empty("viewport", ValueKind::Vec2)
                    .with("placement", Value::Vec2([0.5, 200.0]))
                    .into_node(),
                &[],
            )
            .unwrap();
        let view = ViewNode::node(
            Input::link(Dependency::new(sources, "viewport"), ValueKind::Vec2),
            Input::link(Dependency::new(sources, "placement"), ValueKind::Vec2),
        );
        // Construction succeeds
        graph.insert(SINK_NAME, view, &[]).unwrap();
        graph.validate().unwrap();

        let mut backend = HeadlessBackend::default();
        let err = graph
            .evaluate(&mut FrameContext::new(&mut backend, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::MissingInput { ref node, ref input } if node == SINK_NAME && input == ViewNode::VIEWPORT
        ));
    }
}
