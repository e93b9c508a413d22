// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fragment program assembly.
//!
//! [`build_fragment_shader`] concatenates a [`FragmentShaderParts`] in a
//! fixed order: precision, includes, defines, varyings, built-in uniforms,
//! user uniforms, auxiliary code, the wrapped main body, entry point.
//! Defines precede any code that may reference them and uniform
//! declarations precede the auxiliary code.

use super::parts::FragmentShaderParts;
use super::ShaderError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::LazyLock;

/// Canonical screen-space coordinate varying
pub const COORD: &str = "vUv";
/// Sampler bound to the input pass color
pub const INPUT_SAMPLER: &str = "diffuse";
/// Sampler bound to the input pass depth
pub const DEPTH_SAMPLER: &str = "depth";
/// Target dimensions in pixels
pub const RESOLUTION: &str = "resolution";
/// Camera near plane
pub const CAMERA_NEAR: &str = "cameraNear";
/// Camera far plane
pub const CAMERA_FAR: &str = "cameraFar";
/// Function wrapping the main body
pub const MAIN_FUNCTION: &str = "effect";

/// Names the assembler declares itself
pub const BUILTIN_NAMES: [&str; 7] = [
    COORD,
    INPUT_SAMPLER,
    DEPTH_SAMPLER,
    RESOLUTION,
    CAMERA_NEAR,
    CAMERA_FAR,
    MAIN_FUNCTION,
];

/// Vertex stage shared by every full-screen pass
pub const FULLSCREEN_VERTEX: &str = "\
attribute vec3 position;
attribute vec2 uv;
varying vec2 vUv;
void main() {
    vUv = uv;
    gl_Position = vec4(position, 1.0);
}
";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("invalid identifier regex"));

static INPUT_SAMPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(texture\w*|texelFetch\w*)\s*\(\s*diffuse\s*,")
        .expect("invalid input sample regex")
});

/// Sampling function name fragments that read texels other than the one
/// at the given coordinate
const NEIGHBOURHOOD_READS: [&str; 4] = ["Offset", "Gather", "Fetch", "Proj"];

/// Float precision declared at the top of every program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Precision {
    /// `lowp`
    Low,
    /// `mediump`
    Medium,
    /// `highp`
    #[default]
    High,
}

impl Precision {
    /// Qualifier keyword
    pub fn qualifier(&self) -> &'static str {
        match self {
            Self::Low => "lowp",
            Self::Medium => "mediump",
            Self::High => "highp",
        }
    }
}

/// Whether `name` is a valid identifier in generated program text
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Wrap a main body into a private `vec4 name(in vec4 color)` function
pub fn wrap_function(name: &str, body: &str) -> String {
    let mut function = format!("vec4 {name}(in vec4 color) {{\n");
    for line in body.lines() {
        function.push_str("    ");
        function.push_str(line.trim_end());
        function.push('\n');
    }
    function.push_str("}\n");
    function
}

/// A read of the input sampler found in program text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSample {
    /// Byte range of the whole call
    pub range: Range<usize>,
    /// Sampling function
    pub function: String,
    /// Arguments after the sampler, trimmed
    pub args: Vec<String>,
}

impl InputSample {
    /// Whether the call reads only the input texel at [`COORD`]
    pub fn is_canonical(&self) -> bool {
        self.args.first().is_some_and(|coord| coord == COORD)
            && !NEIGHBOURHOOD_READS
                .iter()
                .any(|fragment| self.function.contains(fragment))
    }

    /// Whether the call is exactly the read that produces the `color`
    /// argument of a main body
    pub fn is_plain(&self) -> bool {
        self.is_canonical()
            && self.args.len() == 1
            && matches!(self.function.as_str(), "texture" | "texture2D")
    }
}

/// Every call sampling the input sampler, in text order
pub fn input_samples(code: &str) -> Vec<InputSample> {
    INPUT_SAMPLE
        .captures_iter(code)
        .filter_map(|captures| {
            let call = captures.get(0)?;
            let function = captures.get(1)?.as_str().to_string();
            let (args, len) = call_arguments(&code[call.end()..]);
            Some(InputSample {
                range: call.start()..call.end() + len,
                function,
                args,
            })
        })
        .collect()
}

/// Split the remaining arguments of a call at top-level commas. Returns
/// them with the byte length up to and including the closing parenthesis.
fn call_arguments(rest: &str) -> (Vec<String>, usize) {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in rest.char_indices() {
        match ch {
            '(' | '[' => depth += 1,
            ')' if depth == 0 => {
                args.push(rest[start..index].trim().to_string());
                return (args, index + 1);
            }
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(rest[start..index].trim().to_string());
                start = index + 1;
            }
            _ => {}
        }
    }
    args.push(rest[start..].trim().to_string());
    (args, rest.len())
}

/// First sample of the input sampler reading anything but the texel at
/// [`COORD`]
pub fn find_offset_sample(code: &str) -> Option<String> {
    input_samples(code)
        .into_iter()
        .find(|sample| !sample.is_canonical())
        .map(|sample| code[sample.range].to_string())
}

/// Assemble fragment program text from structured parts
pub fn build_fragment_shader(
    parts: &FragmentShaderParts,
    precision: Precision,
) -> Result<String, ShaderError> {
    if parts.main.trim().is_empty() {
        return Err(ShaderError::MissingMain);
    }

    let mut src = format!("precision {} float;\n", precision.qualifier());

    for include in &parts.includes {
        src.push_str(&format!("#include <{include}>\n"));
    }

    for (name, value) in &parts.defines {
        if !is_identifier(name) {
            return Err(ShaderError::InvalidIdentifier(name.clone()));
        }
        src.push_str(&format!("#define {name} {value}\n"));
    }

    src.push_str(&format!("varying vec2 {COORD};\n"));
    src.push_str(&format!("uniform sampler2D {INPUT_SAMPLER};\n"));
    src.push_str(&format!("uniform sampler2D {DEPTH_SAMPLER};\n"));
    src.push_str(&format!("uniform vec2 {RESOLUTION};\n"));
    src.push_str(&format!("uniform float {CAMERA_NEAR};\n"));
    src.push_str(&format!("uniform float {CAMERA_FAR};\n"));

    for (name, source) in &parts.uniforms {
        if !is_identifier(name) {
            return Err(ShaderError::InvalidIdentifier(name.clone()));
        }
        if BUILTIN_NAMES.contains(&name.as_str()) {
            return Err(ShaderError::ReservedName(name.clone()));
        }
        let kind = source.normalize().kind;
        let glsl = kind
            .glsl_type()
            .ok_or_else(|| ShaderError::UndeclarableUniform {
                name: name.clone(),
                kind,
            })?;
        src.push_str(&format!("uniform {glsl} {name};\n"));
    }

    if !parts.aux_code.trim().is_empty() {
        src.push_str(parts.aux_code.trim_end());
        src.push('\n');
    }

    src.push_str(&wrap_function(MAIN_FUNCTION, &parts.main));
    src.push_str("void main() {\n");
    src.push_str(&format!(
        "    gl_FragColor = {MAIN_FUNCTION}(texture2D({INPUT_SAMPLER}, {COORD}));\n"
    ));
    src.push_str("}\n");
    Ok(src)
}
