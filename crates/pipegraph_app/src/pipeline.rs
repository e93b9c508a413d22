// SPDX-License-Identifier: MIT OR Apache-2.0
//! Builds and drives the post-processing pipeline described by a
//! [`PipelineConfig`].

use indexmap::IndexMap;
use pipegraph_core::config::EffectConfig;
use pipegraph_core::nodes::{ConstantNode, ScenePassNode, ViewNode};
use pipegraph_core::shader::Precision;
use pipegraph_core::value::RendererId;
use pipegraph_core::{
    ConfigError, Dependency, EvaluationError, FragmentShaderParts, FrameContext, Graph,
    GraphError, HeadlessBackend, Input, Node, OptimizeError, OptimizeReport, Optimizer,
    PipelineConfig, RenderBackend, ShaderError, ShaderPass, Value, ValueKind, SINK_NAME,
};
use tracing::{debug, info};

const SOURCES: &str = "sources";
const RENDERER: &str = "renderer";
const VIEWPORT: &str = "viewport";
const PLACEMENT: &str = "placement";

const SHARPEN_NEIGHBOURS: &str = "\
vec4 neighbours(vec2 uv) {
    vec2 px = 1.0 / resolution;
    return 0.25 * (texture2D(diffuse, uv + vec2(px.x, 0.0))
        + texture2D(diffuse, uv - vec2(px.x, 0.0))
        + texture2D(diffuse, uv + vec2(0.0, px.y))
        + texture2D(diffuse, uv - vec2(0.0, px.y)));
}
";

/// Error building or running a pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration could not be written
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] ron::Error),

    /// Graph construction failed
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// An effect program does not assemble
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Optimization failed
    #[error(transparent)]
    Optimize(#[from] OptimizeError),

    /// A frame failed
    #[error("Frame {frame} failed: {source}")]
    Frame {
        /// Frame number
        frame: u64,
        /// Cause
        source: EvaluationError,
    },
}

/// Effects used when the configuration lists none: a color grade, a
/// sharpen that samples neighbouring pixels and a vignette.
pub fn default_effects() -> Vec<EffectConfig> {
    vec![
        EffectConfig {
            name: "grade".into(),
            parts: FragmentShaderParts::new("return vec4(pow(color.rgb * gain, vec3(GAMMA)), color.a);")
                .with_define("GAMMA", "0.4545")
                .with_uniform("gain", ValueKind::Float),
            uniforms: IndexMap::from([("gain".to_string(), Value::Float(1.1))]),
            ..EffectConfig::default()
        },
        EffectConfig {
            name: "sharpen".into(),
            parts: FragmentShaderParts::new(
                "vec4 blur = neighbours(vUv);\nreturn color + (color - blur) * amount;",
            )
            .with_uniform("amount", ValueKind::Float)
            .with_aux_code(SHARPEN_NEIGHBOURS),
            uniforms: IndexMap::from([("amount".to_string(), Value::Float(0.5))]),
            ..EffectConfig::default()
        },
        EffectConfig {
            name: "vignette".into(),
            parts: FragmentShaderParts::new(
                "float d = distance(vUv, vec2(0.5));\nreturn vec4(color.rgb * smoothstep(0.8, amount, d), color.a);",
            )
            .with_uniform("amount", ValueKind::Float),
            uniforms: IndexMap::from([("amount".to_string(), Value::Float(0.35))]),
            ..EffectConfig::default()
        },
    ]
}

/// Build `sources -> view -> scene -> effects...`; the last effect draws
/// to the screen and is the sink.
pub fn build_graph(config: &PipelineConfig) -> Result<Graph, PipelineError> {
    let backend = &config.backend;
    let mut graph = Graph::new();

    let sources = ConstantNode::new()
        .with(RENDERER, Value::Renderer(RendererId(0)))
        .with(VIEWPORT, Value::Vec2([backend.width as f32, backend.height as f32]))
        .with(PLACEMENT, Value::Vec2([backend.near, backend.far]))
        .into_node();
    let sources = graph.insert(SOURCES, sources, &["view"])?;
    let renderer = Dependency::new(sources, RENDERER);

    let view = ViewNode::node(
        Input::link(Dependency::new(sources, VIEWPORT), ValueKind::Vec2),
        Input::link(Dependency::new(sources, PLACEMENT), ValueKind::Vec2),
    );
    let view = graph.insert("view", view, &[])?;

    let scene = ScenePassNode::node(Dependency::new(view, ViewNode::CAMERA), renderer.clone());
    let mut previous = graph.insert("scene", scene, &[])?;
    let mut sink = "scene".to_string();

    let effects = if config.effects.is_empty() {
        default_effects()
    } else {
        config.effects.clone()
    };
    let count = effects.len();
    for (index, effect) in effects.into_iter().enumerate() {
        let name = if effect.name.is_empty() {
            format!("effect{index}")
        } else {
            effect.name
        };
        let to_screen = index + 1 == count;
        let node = effect_node(
            effect.parts,
            effect.kind,
            effect.uniforms,
            to_screen,
            config.shader.precision,
            Dependency::canonical(previous),
            renderer.clone(),
        )?;
        previous = graph.insert(name.as_str(), node, &[])?;
        sink = name;
    }

    if sink != SINK_NAME {
        graph.set_sink(&sink)?;
    }
    graph.validate()?;
    Ok(graph)
}

fn effect_node(
    parts: FragmentShaderParts,
    kind: String,
    uniforms: IndexMap<String, Value>,
    to_screen: bool,
    precision: Precision,
    target: Dependency,
    renderer: Dependency,
) -> Result<Node, ShaderError> {
    let node = ShaderPass::with_precision(parts, to_screen, precision)?
        .into_node_of_kind(kind, target, renderer);
    Ok(uniforms
        .into_iter()
        .fold(node, |node, (name, value)| node.with_input(name, value)))
}

/// Summary of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Optimizer outcome
    pub report: OptimizeReport,
    /// Nodes left after optimization
    pub nodes: usize,
    /// Frames evaluated
    pub frames: u64,
    /// Draw calls over all frames
    pub draws: usize,
    /// Programs compiled
    pub programs: usize,
}

/// Build, optimize once, then evaluate `config.frames` frames
pub fn run(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    let mut graph = build_graph(config)?;
    info!(nodes = graph.len(), "pipeline built");

    let report = Optimizer::standard(config.optimizer).run(&mut graph)?;
    info!(
        rewrites = report.rewrites.len(),
        rejected = report.rejected,
        nodes = graph.len(),
        "pipeline optimized"
    );
    debug!("optimized graph:\n{}", graph.to_dot());

    let mut backend = HeadlessBackend::new(config.backend.max_texture_units);
    backend.set_camera_planes(config.backend.near, config.backend.far);

    let mut draws = 0;
    for frame in 0..config.frames {
        graph
            .evaluate(&mut FrameContext::new(&mut backend, frame))
            .map_err(|source| PipelineError::Frame { frame, source })?;
        let frame_draws = backend.draws().count();
        debug!(frame, draws = frame_draws, "frame complete");
        draws += frame_draws;
        backend.clear_commands();
    }

    Ok(RunSummary {
        report,
        nodes: graph.len(),
        frames: config.frames,
        draws,
        programs: backend.program_count(),
    })
}
