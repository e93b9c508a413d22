// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fusion of two adjacent full-screen shader passes into one program.

use super::rename::rename_all;
use super::{FusionError, Optimization};
use crate::dependency::{Input, CANONICAL_OUTPUT};
use crate::graph::Graph;
use crate::node::{kinds, Node, NodeId};
use crate::shader::assembly::{find_offset_sample, input_samples, wrap_function};
use crate::shader::{FragmentShaderParts, ShaderPass, RENDERER_INPUT, TARGET_INPUT};
use crate::value::ValueKind;
use indexmap::IndexMap;

/// Prefix given to parent uniforms that collide with a child uniform
pub const PARENT_PREFIX: &str = "parent_";

/// Merges a shader pass into the shader pass feeding it.
///
/// The parent runs first: the fused main is
/// `return pass_child(pass_parent(color));`. The replacement keeps the
/// child's identity, output contract and draw destination.
///
/// Plain reads of the input at the canonical coordinate in the child's
/// main become reads of its `color` argument, the parent's result. A
/// child reading its input any other way is not fused.
#[derive(Debug, Clone)]
pub struct ScreenShaderMerge {
    pattern: Vec<String>,
}

impl Default for ScreenShaderMerge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenShaderMerge {
    /// Merge passes tagged [`kinds::SCREEN_SHADER`]
    pub fn new() -> Self {
        Self::with_pattern(kinds::SCREEN_SHADER, kinds::SCREEN_SHADER)
    }

    /// Merge a `child` tagged pass into a `parent` tagged pass
    pub fn with_pattern(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            pattern: vec![child.into(), parent.into()],
        }
    }
}

impl Optimization for ScreenShaderMerge {
    fn name(&self) -> &str {
        "ScreenShaderMerge"
    }

    fn pattern(&self) -> &[String] {
        &self.pattern
    }

    fn apply(&self, chain: &[&Node], graph: &Graph) -> Result<Node, FusionError> {
        let &[child, parent] = chain else {
            return Err(FusionError::ChainLength {
                expected: 2,
                found: chain.len(),
            });
        };
        let label = |node: &Node| {
            graph
                .find_node(node.id)
                .map_or_else(|| node.id.to_string(), str::to_string)
        };
        let child_pass = child
            .as_shader()
            .ok_or_else(|| FusionError::NotAShader(label(child)))?;
        let parent_pass = parent
            .as_shader()
            .ok_or_else(|| FusionError::NotAShader(label(parent)))?;

        check_preconditions(child, child_pass, parent, graph)?;

        let (parts, renamed) = fuse_parts(
            (child.id, &label(child), child_pass.parts()),
            (parent.id, &label(parent), parent_pass.parts()),
        )?;
        let pass = ShaderPass::with_precision(parts, child_pass.to_screen(), child_pass.precision())?;

        let mut node = Node::new(child.kind.clone(), pass)
            .with_id(child.id)
            .with_output(CANONICAL_OUTPUT, ValueKind::RenderTarget);
        for (name, input) in parent.inputs() {
            let name = renamed.get(name).map_or(name, String::as_str);
            node = node.with_input(name, input.clone());
        }
        for (name, input) in child.inputs() {
            if name != TARGET_INPUT && name != RENDERER_INPUT {
                node = node.with_input(name, input.clone());
            }
        }
        Ok(node)
    }
}

fn check_preconditions(
    child: &Node,
    child_pass: &ShaderPass,
    parent: &Node,
    graph: &Graph,
) -> Result<(), FusionError> {
    let renderer = |node: &Node| node.input(RENDERER_INPUT).and_then(Input::dependency).cloned();
    match (renderer(child), renderer(parent)) {
        (Some(a), Some(b)) if a == b => {}
        _ => return Err(FusionError::RendererMismatch),
    }

    let count = graph.find_dependants(parent.id).count();
    if count != 1 {
        return Err(FusionError::MultipleDependents { count });
    }

    if let Some((input, _)) = child
        .dependencies()
        .find(|(input, dependency)| *input != TARGET_INPUT && dependency.node == parent.id)
    {
        return Err(FusionError::ParentReferenced {
            input: input.to_string(),
        });
    }

    let parts = child_pass.parts();
    for code in [&parts.aux_code, &parts.main] {
        if let Some(sample) = find_offset_sample(code) {
            return Err(FusionError::OffsetSampling { sample });
        }
    }
    let unredirectable = input_samples(&parts.aux_code)
        .into_iter()
        .map(|sample| parts.aux_code[sample.range].to_string())
        .chain(
            input_samples(&parts.main)
                .into_iter()
                .filter(|sample| !sample.is_plain())
                .map(|sample| parts.main[sample.range].to_string()),
        )
        .next();
    if let Some(sample) = unredirectable {
        return Err(FusionError::InputRead { sample });
    }

    if graph.is_exported(parent.id) {
        return Err(FusionError::ExportedOutput);
    }
    Ok(())
}

/// `pass_<id>`, suffixed if `taken` already defines it
fn function_name(id: NodeId, taken: &str) -> String {
    let base = format!("pass_{}", id.ident());
    let mut name = base.clone();
    let mut suffix = 1;
    while taken.contains(&format!("vec4 {name}(")) {
        name = format!("{base}_{suffix}");
        suffix += 1;
    }
    name
}

type Side<'a> = (NodeId, &'a str, &'a FragmentShaderParts);

/// Fuse program parts, returning them with the parent uniform renames
fn fuse_parts(
    (child_id, child_name, child): Side<'_>,
    (parent_id, parent_name, parent): Side<'_>,
) -> Result<(FragmentShaderParts, IndexMap<String, String>), FusionError> {
    let mut includes = parent.includes.clone();
    for include in &child.includes {
        if !includes.contains(include) {
            includes.push(include.clone());
        }
    }

    let mut defines = child.defines.clone();
    for (name, value) in &parent.defines {
        match defines.get(name) {
            Some(existing) if existing != value => {
                return Err(FusionError::DefineConflict {
                    name: name.clone(),
                    child: existing.clone(),
                    parent: value.clone(),
                });
            }
            Some(_) => {}
            None => {
                defines.insert(name.clone(), value.clone());
            }
        }
    }

    let mut renamed: IndexMap<String, String> = IndexMap::new();
    for name in parent.uniforms.keys() {
        if !child.uniforms.contains_key(name) {
            continue;
        }
        let mut new_name = format!("{PARENT_PREFIX}{name}");
        while child.uniforms.contains_key(&new_name)
            || parent.uniforms.contains_key(&new_name)
            || renamed.values().any(|taken| *taken == new_name)
        {
            new_name = format!("{PARENT_PREFIX}{new_name}");
        }
        renamed.insert(name.clone(), new_name);
    }

    let mut uniforms = child.uniforms.clone();
    for (name, source) in &parent.uniforms {
        let name = renamed.get(name).unwrap_or(name);
        uniforms.insert(name.clone(), source.clone());
    }

    let parent_aux = rename_all(&parent.aux_code, &renamed)?;
    let parent_main = rename_all(&parent.main, &renamed)?;
    let child_main = read_parent_result(&child.main);

    let taken = format!("{parent_aux}\n{}", child.aux_code);
    let parent_fn = function_name(parent_id, &taken);
    let child_fn = function_name(child_id, &taken);

    let mut aux_code = String::new();
    for (name, aux, function, main) in [
        (parent_name, parent_aux.as_str(), &parent_fn, parent_main.as_str()),
        (child_name, child.aux_code.as_str(), &child_fn, child_main.as_str()),
    ] {
        aux_code.push_str(&format!("// {name}\n"));
        if !aux.trim().is_empty() {
            aux_code.push_str(aux.trim_end());
            aux_code.push('\n');
        }
        aux_code.push_str(&wrap_function(function, main));
    }

    let parts = FragmentShaderParts {
        includes,
        defines,
        uniforms,
        aux_code,
        main: format!("return {child_fn}({parent_fn}(color));"),
    };
    Ok((parts, renamed))
}

/// Replace plain input reads in a child main body by its `color` argument
fn read_parent_result(main: &str) -> String {
    let mut text = String::with_capacity(main.len());
    let mut last = 0;
    for sample in input_samples(main).into_iter().filter(|sample| sample.is_plain()) {
        text.push_str(&main[last..sample.range.start]);
        text.push_str("color");
        last = sample.range.end;
    }
    text.push_str(&main[last..]);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Dependency;
    use crate::nodes::ConstantNode;
    use crate::shader::build_fragment_shader;
    use crate::shader::Precision;
    use crate::subgraph::SubGraph;
    use crate::value::{RendererId, Value};

    struct Fixture {
        graph: Graph,
        scene: NodeId,
        parent: NodeId,
        child: NodeId,
    }

    fn fixture(parent: FragmentShaderParts, child: FragmentShaderParts) -> Fixture {
        let mut graph = Graph::new();
        let scene = graph
            .insert(
                "scene",
                ConstantNode::new()
                    .with_empty(CANONICAL_OUTPUT, ValueKind::RenderTarget)
                    .with("renderer", Value::Renderer(RendererId(0)))
                    .with("other", Value::Renderer(RendererId(1)))
                    .into_node(),
                &[],
            )
            .unwrap();
        let renderer = Dependency::new(scene, "renderer");
        let parent = ShaderPass::new(parent, false)
            .unwrap()
            .into_node(Dependency::canonical(scene), renderer.clone());
        let parent = graph.insert("parent", parent, &[]).unwrap();
        let child = ShaderPass::new(child, true)
            .unwrap()
            .into_node(Dependency::canonical(parent), renderer);
        let child = graph.insert("out", child, &[]).unwrap();
        Fixture {
            graph,
            scene,
            parent,
            child,
        }
    }

    impl Fixture {
        fn fuse(&self) -> Result<Node, FusionError> {
            let chain = [
                self.graph.node(self.child).unwrap(),
                self.graph.node(self.parent).unwrap(),
            ];
            ScreenShaderMerge::new().apply(&chain, &self.graph)
        }
    }

    fn simple() -> Fixture {
        fixture(
            FragmentShaderParts::new("return color * 2.0;"),
            FragmentShaderParts::new("return color.bgra;"),
        )
    }

    #[test]
    fn test_composition_order() {
        let f = fixture(
            FragmentShaderParts::new("return tint(color);")
                .with_aux_code("vec4 tint(vec4 c) { return c * 0.5; }"),
            FragmentShaderParts::new("return color.bgra;")
                .with_aux_code("const float K = 2.0;"),
        );
        let node = f.fuse().unwrap();
        let pass = node.as_shader().unwrap();
        let parent_fn = format!("pass_{}", f.parent.ident());
        let child_fn = format!("pass_{}", f.child.ident());

        assert_eq!(pass.parts().main, format!("return {child_fn}({parent_fn}(color));"));
        let aux = &pass.parts().aux_code;
        let order = [
            aux.find("// parent").unwrap(),
            aux.find("vec4 tint(").unwrap(),
            aux.find(&format!("vec4 {parent_fn}(in vec4 color)")).unwrap(),
            aux.find("// out").unwrap(),
            aux.find("const float K").unwrap(),
            aux.find(&format!("vec4 {child_fn}(in vec4 color)")).unwrap(),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(node.id, f.child);
        assert!(pass.to_screen());
        assert_eq!(node.primary_dependency(), Some(&Dependency::canonical(f.scene)));
        // One program for both passes
        assert!(pass.program().fragment().contains(&parent_fn));
        assert!(pass.program().fragment().contains(&child_fn));
    }

    #[test]
    fn test_colliding_uniforms_renamed_on_whole_words() {
        let f = fixture(
            FragmentShaderParts::new("return color * u + union;")
                .with_uniform("u", ValueKind::Float)
                .with_uniform("union", ValueKind::Float)
                .with_aux_code("float scaled() { return u * 2.0; }"),
            FragmentShaderParts::new("return color - u;").with_uniform("u", ValueKind::Float),
        );
        let mut graph = f.graph;
        let parent = graph.node_mut(f.parent).unwrap();
        parent.set_input("u", Value::Float(0.25));
        let f = Fixture { graph, ..f };

        let node = f.fuse().unwrap();
        let parts = node.as_shader().unwrap().parts();
        let names: Vec<&str> = parts.uniforms.keys().map(String::as_str).collect();
        assert_eq!(names, ["u", "parent_u", "union"]);
        assert!(parts.aux_code.contains("return parent_u * 2.0;"));
        assert!(parts.aux_code.contains("return color * parent_u + union;"));
        assert!(parts.aux_code.contains("return color - u;"));
        assert_eq!(node.input("parent_u"), Some(&Input::Value(Value::Float(0.25))));
        assert!(node.input("u").is_none());
    }

    #[test]
    fn test_prefixed_renames_stay_distinct() {
        // Both sides already carry a renamed uniform from an earlier fusion
        let declare = |main: &str| {
            FragmentShaderParts::new(main)
                .with_uniform("u", ValueKind::Float)
                .with_uniform("parent_u", ValueKind::Vec4)
        };
        let f = fixture(
            declare("return color * u + parent_u;"),
            declare("return color * u - parent_u;"),
        );
        let mut graph = f.graph;
        let parent = graph.node_mut(f.parent).unwrap();
        parent.set_input("u", Value::Float(0.5));
        parent.set_input("parent_u", Value::Vec4([1.0; 4]));
        let f = Fixture { graph, ..f };

        let node = f.fuse().unwrap();
        let parts = node.as_shader().unwrap().parts();
        let declared: Vec<(&str, ValueKind)> = parts
            .uniforms
            .iter()
            .map(|(name, source)| (name.as_str(), source.normalize().kind))
            .collect();
        assert_eq!(
            declared,
            [
                ("u", ValueKind::Float),
                ("parent_u", ValueKind::Vec4),
                ("parent_parent_u", ValueKind::Float),
                ("parent_parent_parent_u", ValueKind::Vec4),
            ]
        );
        assert!(parts
            .aux_code
            .contains("return color * parent_parent_u + parent_parent_parent_u;"));
        assert!(parts.aux_code.contains("return color * u - parent_u;"));
        assert_eq!(
            node.input("parent_parent_u"),
            Some(&Input::Value(Value::Float(0.5)))
        );
        assert_eq!(
            node.input("parent_parent_parent_u"),
            Some(&Input::Value(Value::Vec4([1.0; 4])))
        );
    }

    #[test]
    fn test_inputs_rewired() {
        let f = simple();
        let node = f.fuse().unwrap();
        assert_eq!(
            node.input(TARGET_INPUT).and_then(Input::dependency),
            Some(&Dependency::canonical(f.scene))
        );
        assert_eq!(
            node.input(RENDERER_INPUT).and_then(Input::dependency),
            Some(&Dependency::new(f.scene, "renderer"))
        );
        assert!(!node.depends_on(f.parent));
        assert_eq!(node.output(CANONICAL_OUTPUT).unwrap().kind, ValueKind::RenderTarget);
    }

    #[test]
    fn test_renderer_mismatch() {
        let mut f = simple();
        let other = Dependency::new(f.scene, "other");
        f.graph
            .connect("out", RENDERER_INPUT, other, ValueKind::Renderer)
            .unwrap();
        assert!(matches!(f.fuse(), Err(FusionError::RendererMismatch)));
    }

    #[test]
    fn test_parent_with_second_dependent() {
        let mut f = simple();
        let observer = ConstantNode::new().into_node().with_input(
            "seen",
            Input::link(Dependency::canonical(f.parent), ValueKind::Texture),
        );
        f.graph.insert("observer", observer, &[]).unwrap();
        assert!(matches!(
            f.fuse(),
            Err(FusionError::MultipleDependents { count: 2 })
        ));
    }

    #[test]
    fn test_offset_sampling_rejected() {
        let f = fixture(
            FragmentShaderParts::new("return color;"),
            FragmentShaderParts::new(
                "return texture2D(diffuse, vUv + vec2(1.0) / resolution) + color;",
            ),
        );
        assert!(matches!(f.fuse(), Err(FusionError::OffsetSampling { .. })));

        let lod = fixture(
            FragmentShaderParts::new("return color;"),
            FragmentShaderParts::new("return texture2DLod(diffuse, vUv + vec2(0.01), 0.0);"),
        );
        assert!(matches!(lod.fuse(), Err(FusionError::OffsetSampling { .. })));
    }

    #[test]
    fn test_canonical_input_read_becomes_parent_result() {
        let f = fixture(
            FragmentShaderParts::new("return color * 2.0;"),
            FragmentShaderParts::new("vec4 base = texture2D(diffuse, vUv);\nreturn mix(base, color, 0.5);"),
        );
        let node = f.fuse().unwrap();
        let aux = &node.as_shader().unwrap().parts().aux_code;
        assert!(aux.contains("vec4 base = color;"));
        assert!(!aux.contains("texture2D(diffuse"));
    }

    #[test]
    fn test_unredirectable_input_reads_rejected() {
        let lod = fixture(
            FragmentShaderParts::new("return color;"),
            FragmentShaderParts::new("return textureLod(diffuse, vUv, 1.0);"),
        );
        assert!(matches!(
            lod.fuse(),
            Err(FusionError::InputRead { ref sample }) if sample == "textureLod(diffuse, vUv, 1.0)"
        ));

        let helper = fixture(
            FragmentShaderParts::new("return color;"),
            FragmentShaderParts::new("return color * base().a;")
                .with_aux_code("vec4 base() { return texture2D(diffuse, vUv); }"),
        );
        assert!(matches!(helper.fuse(), Err(FusionError::InputRead { .. })));
    }

    #[test]
    fn test_parent_offset_sampling_allowed() {
        let f = fixture(
            FragmentShaderParts::new("return texture2D(diffuse, vUv * 0.5);"),
            FragmentShaderParts::new("return color;"),
        );
        assert!(f.fuse().is_ok());
    }

    #[test]
    fn test_exported_parent_rejected() {
        let mut sub = SubGraph::new();
        let scene = sub
            .graph_mut()
            .insert(
                "scene",
                ConstantNode::new()
                    .with_empty(CANONICAL_OUTPUT, ValueKind::RenderTarget)
                    .with("renderer", Value::Renderer(RendererId(0)))
                    .into_node(),
                &[],
            )
            .unwrap();
        let renderer = Dependency::new(scene, "renderer");
        let parent = ShaderPass::new(FragmentShaderParts::new("return color;"), false)
            .unwrap()
            .into_node(Dependency::canonical(scene), renderer.clone());
        let parent = sub.graph_mut().insert("parent", parent, &[]).unwrap();
        let child = ShaderPass::new(FragmentShaderParts::new("return color;"), false)
            .unwrap()
            .into_node(Dependency::canonical(parent), renderer);
        let child = sub.graph_mut().insert("child", child, &[]).unwrap();
        sub.expose_output("intermediate", Dependency::canonical(parent)).unwrap();
        sub.expose_output("final", Dependency::canonical(child)).unwrap();

        let graph = sub.graph();
        let chain = [graph.node(child).unwrap(), graph.node(parent).unwrap()];
        assert!(matches!(
            ScreenShaderMerge::new().apply(&chain, graph),
            Err(FusionError::ExportedOutput)
        ));
    }

    #[test]
    fn test_define_conflict() {
        let f = fixture(
            FragmentShaderParts::new("return color;")
                .with_define("SAMPLES", "4")
                .with_define("SHARED", "1"),
            FragmentShaderParts::new("return color;")
                .with_define("SAMPLES", "8")
                .with_define("SHARED", "1"),
        );
        assert!(matches!(
            f.fuse(),
            Err(FusionError::DefineConflict { ref name, ref child, ref parent })
                if name == "SAMPLES" && child == "8" && parent == "4"
        ));
    }

    #[test]
    fn test_includes_and_defines_merged() {
        let f = fixture(
            FragmentShaderParts::new("return color;")
                .with_include("packing")
                .with_define("SHARED", "1"),
            FragmentShaderParts::new("return color;")
                .with_include("packing")
                .with_include("common")
                .with_define("SHARED", "1"),
        );
        let node = f.fuse().unwrap();
        let parts = node.as_shader().unwrap().parts();
        assert_eq!(parts.includes, ["packing", "common"]);
        assert_eq!(parts.defines.len(), 1);
        assert!(build_fragment_shader(parts, Precision::High).is_ok());
    }

    #[test]
    fn test_function_names_stay_unique() {
        let id = NodeId::new();
        let taken = format!("vec4 pass_{}(in vec4 color) {{}}", id.ident());
        assert_eq!(function_name(id, &taken), format!("pass_{}_1", id.ident()));
        assert_eq!(function_name(id, ""), format!("pass_{}", id.ident()));
    }
}
