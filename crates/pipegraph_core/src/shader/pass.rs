// SPDX-License-Identifier: MIT OR Apache-2.0
//! The full-screen shader pass node.

use super::assembly::{
    build_fragment_shader, Precision, CAMERA_FAR, CAMERA_NEAR, DEPTH_SAMPLER, FULLSCREEN_VERTEX,
    INPUT_SAMPLER, RESOLUTION,
};
use super::parts::{FragmentShaderParts, UniformSlot};
use super::ShaderError;
use crate::backend::{BackendError, ProgramId, ProgramSource, RenderBackend, UniformBindings};
use crate::dependency::{Dependency, Input, CANONICAL_OUTPUT};
use crate::evaluation::{EvaluationError, FrameContext, NodeOutput, ResolvedInputs};
use crate::node::{kinds, Node, NodeBehavior};
use crate::value::{RenderTarget, Value, ValueKind};
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Input linked to the pass being post-processed
pub const TARGET_INPUT: &str = "target";
/// Input linked to the render context
pub const RENDERER_INPUT: &str = "renderer";

/// Program owned by a shader pass, compiled on first use
#[derive(Debug, Clone)]
pub struct Program {
    source: ProgramSource,
    handle: Option<ProgramId>,
}

impl Program {
    /// Create an uncompiled program around a fragment stage
    pub fn new(fragment: String) -> Self {
        Self {
            source: ProgramSource {
                vertex: FULLSCREEN_VERTEX.to_string(),
                fragment,
            },
            handle: None,
        }
    }

    /// Program source text
    pub fn source(&self) -> &ProgramSource {
        &self.source
    }

    /// Fragment stage text
    pub fn fragment(&self) -> &str {
        &self.source.fragment
    }

    /// Backend handle, once compiled
    pub fn handle(&self) -> Option<ProgramId> {
        self.handle
    }

    fn compile(&mut self, backend: &mut dyn RenderBackend) -> Result<ProgramId, BackendError> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let handle = backend.compile_program(&self.source)?;
        debug!(program = handle.0, "compiled full-screen program");
        self.handle = Some(handle);
        Ok(handle)
    }
}

/// A full-screen effect pass.
///
/// Samples the `target` input's color (and depth) and draws one
/// full-screen quad with a program assembled from its
/// [`FragmentShaderParts`], either into an intermediate target it owns or
/// straight to the final surface.
#[derive(Debug, Clone)]
pub struct ShaderPass {
    parts: FragmentShaderParts,
    uniforms: IndexMap<String, UniformSlot>,
    to_screen: bool,
    precision: Precision,
    program: Program,
    target: Option<RenderTarget>,
}

impl ShaderPass {
    /// Create a pass with default precision
    pub fn new(parts: FragmentShaderParts, to_screen: bool) -> Result<Self, ShaderError> {
        Self::with_precision(parts, to_screen, Precision::default())
    }

    /// Create a pass, assembling its program at the given precision
    pub fn with_precision(
        parts: FragmentShaderParts,
        to_screen: bool,
        precision: Precision,
    ) -> Result<Self, ShaderError> {
        let fragment = build_fragment_shader(&parts, precision)?;
        Ok(Self {
            uniforms: parts.uniform_slots(),
            parts,
            to_screen,
            precision,
            program: Program::new(fragment),
            target: None,
        })
    }

    /// Program description
    pub fn parts(&self) -> &FragmentShaderParts {
        &self.parts
    }

    /// Normalized user uniforms
    pub fn uniforms(&self) -> &IndexMap<String, UniformSlot> {
        &self.uniforms
    }

    /// Whether the pass draws to the final surface
    pub fn to_screen(&self) -> bool {
        self.to_screen
    }

    /// Declared float precision
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Owned program
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Wrap into a [`kinds::SCREEN_SHADER`] node
    pub fn into_node(self, target: Dependency, renderer: Dependency) -> Node {
        self.into_node_of_kind(kinds::SCREEN_SHADER, target, renderer)
    }

    /// Wrap into a node with a custom type tag.
    ///
    /// Uniforms with a producer become link inputs named after the uniform;
    /// type-only uniforms are fed with literal inputs of the same name.
    pub fn into_node_of_kind(
        self,
        kind: impl Into<String>,
        target: Dependency,
        renderer: Dependency,
    ) -> Node {
        let links: Vec<(String, Input)> = self
            .uniforms
            .iter()
            .filter_map(|(name, slot)| {
                slot.dependency
                    .clone()
                    .map(|dependency| (name.clone(), Input::link(dependency, slot.kind)))
            })
            .collect();

        let node = Node::new(kind, self)
            .with_input(TARGET_INPUT, Input::link(target, ValueKind::RenderTarget))
            .with_input(RENDERER_INPUT, Input::link(renderer, ValueKind::Renderer))
            .with_output(CANONICAL_OUTPUT, ValueKind::RenderTarget);
        links
            .into_iter()
            .fold(node, |node, (name, input)| node.with_input(name, input))
    }

    /// Uniform values for one draw: user values first, then built-ins that
    /// were not supplied.
    fn uniform_values(
        &self,
        inputs: &ResolvedInputs,
        input: &RenderTarget,
        camera: (f32, f32),
    ) -> UniformBindings {
        let mut values = UniformBindings::new();
        for name in self.uniforms.keys() {
            if let Some(value) = inputs.get(name) {
                values.insert(name.clone(), value.clone());
            }
        }
        for name in [RESOLUTION, CAMERA_NEAR, CAMERA_FAR] {
            if let Some(value) = inputs.get(name) {
                values
                    .entry(name.to_string())
                    .or_insert_with(|| value.clone());
            }
        }

        values
            .entry(INPUT_SAMPLER.to_string())
            .or_insert(Value::Texture(input.color));
        if let Some(depth) = input.depth {
            values
                .entry(DEPTH_SAMPLER.to_string())
                .or_insert(Value::Texture(depth));
        }
        values
            .entry(RESOLUTION.to_string())
            .or_insert(Value::Vec2([input.width as f32, input.height as f32]));
        values
            .entry(CAMERA_NEAR.to_string())
            .or_insert(Value::Float(camera.0));
        values
            .entry(CAMERA_FAR.to_string())
            .or_insert(Value::Float(camera.1));
        values
    }

    fn intermediate_target(
        &mut self,
        input: &RenderTarget,
        backend: &mut dyn RenderBackend,
    ) -> RenderTarget {
        match self.target {
            Some(target) if target.width == input.width && target.height == input.height => target,
            _ => {
                let target = backend.allocate_target(input.width, input.height, false);
                self.target = Some(target);
                target
            }
        }
    }
}

/// Drop user sampler bindings that exceed the backend's texture units.
/// The input color and depth samplers are always kept.
fn drop_excess_samplers(values: &mut UniformBindings, max_units: usize, node: &str) {
    let is_builtin = |name: &str| name == INPUT_SAMPLER || name == DEPTH_SAMPLER;
    let builtin = values
        .iter()
        .filter(|(name, value)| is_builtin(name) && value.kind().is_sampler())
        .count();
    let mut budget = max_units.saturating_sub(builtin);

    values.retain(|name, value| {
        if !value.kind().is_sampler() || is_builtin(name) {
            return true;
        }
        if budget > 0 {
            budget -= 1;
            return true;
        }
        warn!(node, uniform = %name, max_units, "dropping sampler beyond texture unit limit");
        false
    });
}

impl NodeBehavior for ShaderPass {
    fn evaluate(
        &mut self,
        inputs: &ResolvedInputs,
        ctx: &mut FrameContext<'_>,
    ) -> Result<NodeOutput, EvaluationError> {
        let input = *inputs.require_as(
            TARGET_INPUT,
            ValueKind::RenderTarget,
            Value::as_render_target,
        )?;
        inputs.require_as(RENDERER_INPUT, ValueKind::Renderer, Value::as_renderer)?;

        let mut uniforms = self.uniform_values(inputs, &input, ctx.backend.camera_planes());
        drop_excess_samplers(&mut uniforms, ctx.backend.max_texture_units(), inputs.node());

        let program = self.program.compile(&mut *ctx.backend)?;
        ctx.backend.bind_uniforms(program, &uniforms)?;

        let output = if self.to_screen {
            None
        } else {
            Some(self.intermediate_target(&input, &mut *ctx.backend))
        };
        ctx.backend.bind_target(output.as_ref());
        ctx.backend.clear();
        ctx.backend.draw_fullscreen_quad(program)?;

        // Downstream passes keep sampling the depth of the pass chain's input
        Ok(match output {
            Some(target) => NodeOutput::single(
                CANONICAL_OUTPUT,
                Value::RenderTarget(RenderTarget {
                    depth: input.depth,
                    ..target
                }),
            ),
            None => NodeOutput::new(),
        })
    }

    fn primary_input(&self) -> Option<&str> {
        Some(TARGET_INPUT)
    }

    fn as_shader(&self) -> Option<&ShaderPass> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, HeadlessBackend};
    use crate::graph::Graph;
    use crate::nodes::ConstantNode;
    use crate::value::{RendererId, TargetId, TextureId};

    fn input_target() -> RenderTarget {
        RenderTarget {
            id: TargetId(100),
            width: 320,
            height: 200,
            color: TextureId(101),
            depth: Some(TextureId(102)),
        }
    }

    /// Graph `scene -> fx -> out` where `out` only consumes the effect
    fn graph_with(pass: ShaderPass, literals: &[(&str, Value)]) -> (Graph, crate::NodeId) {
        let mut graph = Graph::new();
        let scene = graph
            .insert(
                "scene",
                ConstantNode::new()
                    .with(CANONICAL_OUTPUT, Value::RenderTarget(input_target()))
                    .with("renderer", Value::Renderer(RendererId(0)))
                    .into_node(),
                &[],
            )
            .unwrap();
        let node = literals.iter().fold(
            pass.into_node(
                Dependency::canonical(scene),
                Dependency::new(scene, "renderer"),
            ),
            |node, (name, value)| node.with_input(*name, value.clone()),
        );
        let fx = graph.insert("fx", node, &[]).unwrap();
        graph.set_sink("fx").unwrap();
        graph.validate().unwrap();
        (graph, fx)
    }

    #[test]
    fn test_draws_into_intermediate_target() {
        let pass = ShaderPass::new(
            FragmentShaderParts::new("return color * gain;").with_uniform("gain", ValueKind::Float),
            false,
        )
        .unwrap();
        let (mut graph, fx) = graph_with(pass, &[("gain", Value::Float(0.5))]);

        let mut backend = HeadlessBackend::default();
        backend.set_camera_planes(1.0, 50.0);
        graph.evaluate(&mut FrameContext::new(&mut backend, 0)).unwrap();

        let output = graph.node(fx).unwrap().output(CANONICAL_OUTPUT).unwrap();
        let Some(Value::RenderTarget(target)) = output.value() else {
            panic!("no target published");
        };
        assert_eq!((target.width, target.height), (320, 200));

        let (program, drawn) = backend.draws().next().unwrap();
        assert_eq!(drawn, Some(target.id));
        let uniforms = backend.last_uniforms(program).unwrap();
        assert_eq!(uniforms["gain"], Value::Float(0.5));
        assert_eq!(uniforms[INPUT_SAMPLER], Value::Texture(TextureId(101)));
        assert_eq!(uniforms[DEPTH_SAMPLER], Value::Texture(TextureId(102)));
        assert_eq!(uniforms[RESOLUTION], Value::Vec2([320.0, 200.0]));
        assert_eq!(uniforms[CAMERA_NEAR], Value::Float(1.0));
        assert_eq!(uniforms[CAMERA_FAR], Value::Float(50.0));
        // User uniforms come first
        assert_eq!(uniforms.get_index(0).map(|(k, _)| k.as_str()), Some("gain"));
    }

    #[test]
    fn test_depth_forwarded_through_chain() {
        let first = ShaderPass::new(FragmentShaderParts::new("return color * 2.0;"), false).unwrap();
        let (mut graph, fx) = graph_with(first, &[]);
        let scene = graph.get("scene").unwrap().id;
        let second = ShaderPass::new(
            FragmentShaderParts::new("return color * texture2D(depth, vUv).r;"),
            true,
        )
        .unwrap()
        .into_node(Dependency::canonical(fx), Dependency::new(scene, "renderer"));
        graph.insert("next", second, &[]).unwrap();
        graph.set_sink("next").unwrap();
        graph.validate().unwrap();

        let mut backend = HeadlessBackend::default();
        graph.evaluate(&mut FrameContext::new(&mut backend, 0)).unwrap();

        let Some(Value::RenderTarget(published)) =
            graph.node(fx).unwrap().output(CANONICAL_OUTPUT).unwrap().value().cloned()
        else {
            panic!("no target published");
        };
        assert_eq!(published.depth, Some(TextureId(102)));

        // Both passes bind the scene depth, as a fused program would
        let draws: Vec<_> = backend.draws().collect();
        assert_eq!(draws.len(), 2);
        let (program, _) = draws[1];
        let uniforms = backend.last_uniforms(program).unwrap();
        assert_eq!(uniforms[DEPTH_SAMPLER], Value::Texture(TextureId(102)));
        assert_eq!(uniforms[INPUT_SAMPLER], Value::Texture(published.color));
    }

    #[test]
    fn test_target_and_program_reused_across_frames() {
        let pass = ShaderPass::new(FragmentShaderParts::new("return color;"), false).unwrap();
        let (mut graph, _) = graph_with(pass, &[]);

        let mut backend = HeadlessBackend::default();
        for frame in 0..3 {
            graph.evaluate(&mut FrameContext::new(&mut backend, frame)).unwrap();
        }
        let allocations = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Allocate(_)))
            .count();
        assert_eq!(allocations, 1);
        assert_eq!(backend.program_count(), 1);
        assert_eq!(backend.draws().count(), 3);
    }

    #[test]
    fn test_to_screen_and_overrides() {
        let pass = ShaderPass::new(FragmentShaderParts::new("return color;"), true).unwrap();
        let (mut graph, fx) = graph_with(
            pass,
            &[
                (RESOLUTION, Value::Vec2([1.0, 1.0])),
                (CAMERA_FAR, Value::Float(9.0)),
            ],
        );

        let mut backend = HeadlessBackend::default();
        graph.evaluate(&mut FrameContext::new(&mut backend, 0)).unwrap();

        let (program, target) = backend.draws().next().unwrap();
        assert_eq!(target, None);
        assert!(graph.node(fx).unwrap().output(CANONICAL_OUTPUT).unwrap().value().is_none());
        let uniforms = backend.last_uniforms(program).unwrap();
        assert_eq!(uniforms[RESOLUTION], Value::Vec2([1.0, 1.0]));
        assert_eq!(uniforms[CAMERA_FAR], Value::Float(9.0));
    }

    #[test]
    fn test_excess_samplers_dropped() {
        let parts = FragmentShaderParts::new("return color;")
            .with_uniform("maskA", ValueKind::Texture)
            .with_uniform("maskB", ValueKind::Texture)
            .with_uniform("gain", ValueKind::Float);
        let pass = ShaderPass::new(parts, false).unwrap();
        let (mut graph, _) = graph_with(
            pass,
            &[
                ("maskA", Value::Texture(TextureId(1))),
                ("maskB", Value::Texture(TextureId(2))),
                ("gain", Value::Float(1.0)),
            ],
        );

        // diffuse + depth + one user sampler
        let mut backend = HeadlessBackend::new(3);
        graph.evaluate(&mut FrameContext::new(&mut backend, 0)).unwrap();

        let (program, _) = backend.draws().next().unwrap();
        let uniforms = backend.last_uniforms(program).unwrap();
        assert!(uniforms.contains_key("maskA"));
        assert!(!uniforms.contains_key("maskB"));
        assert!(uniforms.contains_key("gain"));
        assert!(uniforms.contains_key(INPUT_SAMPLER));
    }

    #[test]
    fn test_missing_target_is_fatal() {
        let mut graph = Graph::new();
        let scene = graph
            .insert(
                "scene",
                ConstantNode::new()
                    .with("renderer", Value::Renderer(RendererId(0)))
                    .with_empty(CANONICAL_OUTPUT, ValueKind::RenderTarget)
                    .into_node(),
                &[],
            )
            .unwrap();
        let pass = ShaderPass::new(FragmentShaderParts::new("return color;"), false).unwrap();
        graph
            .insert(
                "out",
                pass.into_node(Dependency::canonical(scene), Dependency::new(scene, "renderer")),
                &[],
            )
            .unwrap();
        graph.validate().unwrap();

        let mut backend = HeadlessBackend::default();
        let err = graph
            .evaluate(&mut FrameContext::new(&mut backend, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::MissingInput { ref input, .. } if input == TARGET_INPUT
        ));
    }

    #[test]
    fn test_uniform_links_become_inputs() {
        let producer = crate::NodeId::new();
        let parts = FragmentShaderParts::new("return color;").with_uniform(
            "mask",
            crate::shader::UniformSource::Node {
                node: producer,
                kind: ValueKind::RenderTarget,
            },
        );
        let node = ShaderPass::new(parts, false).unwrap().into_node(
            Dependency::canonical(producer),
            Dependency::new(producer, "renderer"),
        );
        assert_eq!(node.kind, kinds::SCREEN_SHADER);
        assert_eq!(
            node.input("mask").and_then(Input::dependency),
            Some(&Dependency::canonical(producer))
        );
        assert_eq!(node.primary_dependency(), Some(&Dependency::canonical(producer)));
        assert!(node.as_shader().is_some());
    }
}
