// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured description of a full-screen fragment program.

use crate::dependency::Dependency;
use crate::node::NodeId;
use crate::value::ValueKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Where a uniform's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UniformSource {
    /// Declared type only; the value is supplied as a literal node input
    Type(ValueKind),
    /// Canonical output of a node
    Node {
        /// Producer node
        node: NodeId,
        /// Kind of its canonical output
        kind: ValueKind,
    },
    /// Explicit producer output
    Dependency {
        /// Producer output
        dependency: Dependency,
        /// Kind of that output
        kind: ValueKind,
    },
}

impl UniformSource {
    /// Normalize into a `(dependency, kind)` pair
    pub fn normalize(&self) -> UniformSlot {
        match self {
            Self::Type(kind) => UniformSlot {
                dependency: None,
                kind: *kind,
            },
            Self::Node { node, kind } => UniformSlot {
                dependency: Some(Dependency::canonical(*node)),
                kind: *kind,
            },
            Self::Dependency { dependency, kind } => UniformSlot {
                dependency: Some(dependency.clone()),
                kind: *kind,
            },
        }
    }
}

impl From<ValueKind> for UniformSource {
    fn from(kind: ValueKind) -> Self {
        Self::Type(kind)
    }
}

/// A normalized uniform declaration
#[derive(Debug, Clone, PartialEq)]
pub struct UniformSlot {
    /// Producer of the value, if linked
    pub dependency: Option<Dependency>,
    /// Declared kind
    pub kind: ValueKind,
}

/// The program description of a full-screen pass.
///
/// `main` is the body of a function `vec4 (in vec4 color)` mapping the
/// input sample at the canonical coordinate to the output sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentShaderParts {
    /// Include names, emitted as `#include` directives
    pub includes: Vec<String>,
    /// Preprocessor definitions
    pub defines: IndexMap<String, String>,
    /// Uniform declarations
    pub uniforms: IndexMap<String, UniformSource>,
    /// Helper declarations emitted before the main function
    pub aux_code: String,
    /// Main body
    pub main: String,
}

impl FragmentShaderParts {
    /// Create parts with a main body
    pub fn new(main: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            ..Self::default()
        }
    }

    /// Add an include
    pub fn with_include(mut self, name: impl Into<String>) -> Self {
        self.includes.push(name.into());
        self
    }

    /// Add a define
    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }

    /// Add a uniform
    pub fn with_uniform(mut self, name: impl Into<String>, source: impl Into<UniformSource>) -> Self {
        self.uniforms.insert(name.into(), source.into());
        self
    }

    /// Set auxiliary code
    pub fn with_aux_code(mut self, code: impl Into<String>) -> Self {
        self.aux_code = code.into();
        self
    }

    /// Normalized uniform declarations
    pub fn uniform_slots(&self) -> IndexMap<String, UniformSlot> {
        self.uniforms
            .iter()
            .map(|(name, source)| (name.clone(), source.normalize()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_normalization() {
        let node = NodeId::new();
        let parts = FragmentShaderParts::new("return color;")
            .with_uniform("gain", ValueKind::Float)
            .with_uniform(
                "mask",
                UniformSource::Node {
                    node,
                    kind: ValueKind::RenderTarget,
                },
            )
            .with_uniform(
                "depthMap",
                UniformSource::Dependency {
                    dependency: Dependency::new(node, "depth"),
                    kind: ValueKind::Texture,
                },
            );

        let slots = parts.uniform_slots();
        assert_eq!(slots["gain"].dependency, None);
        assert_eq!(slots["mask"].dependency, Some(Dependency::canonical(node)));
        assert_eq!(slots["depthMap"].dependency, Some(Dependency::new(node, "depth")));
        assert_eq!(slots["depthMap"].kind, ValueKind::Texture);
    }

    #[test]
    fn test_parts_from_ron() {
        let parts: FragmentShaderParts = ron::from_str(
            r#"(
                defines: { "STRENGTH": "0.5" },
                uniforms: { "tint": Type(Vec3) },
                main: "return vec4(color.rgb * tint, color.a);",
            )"#,
        )
        .unwrap();
        assert!(parts.includes.is_empty());
        assert_eq!(parts.defines["STRENGTH"], "0.5");
        assert_eq!(parts.uniforms["tint"], UniformSource::Type(ValueKind::Vec3));
    }
}
