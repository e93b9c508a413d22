// SPDX-License-Identifier: MIT OR Apache-2.0
//! Value kinds and values that flow along dependency edges.

use serde::{Deserialize, Serialize};

/// Opaque texture handle issued by a render backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureId(pub u64);

/// Opaque render target handle issued by a render backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub u64);

/// Identifies the render context a node draws with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RendererId(pub u32);

/// A render target as seen by the graph: dimensions plus sampling handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderTarget {
    /// Backend handle
    pub id: TargetId,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Color attachment, sampleable
    pub color: TextureId,
    /// Depth attachment, if the target has one
    pub depth: Option<TextureId>,
}

/// Camera parameters produced by view nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels
    pub height: u32,
    /// Near clipping plane
    pub near: f32,
    /// Far clipping plane
    pub far: f32,
}

/// Kind of value that can flow through an input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// 2D vector
    Vec2,
    /// 3D vector
    Vec3,
    /// 4D vector / color
    Vec4,
    /// Matrix 4x4
    Mat4,
    /// Sampleable texture
    Texture,
    /// Render target (sampleable through its color attachment)
    RenderTarget,
    /// Render context handle
    Renderer,
    /// Camera parameters
    Camera,
    /// String value
    String,
}

impl ValueKind {
    /// Check if a value of this kind can feed an input expecting `other`
    pub fn can_connect_to(&self, other: &ValueKind) -> bool {
        if self == other {
            return true;
        }

        match (self, other) {
            // Numeric conversions
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => true,
            // Scalar splat
            (Self::Float, Self::Vec2 | Self::Vec3 | Self::Vec4) => true,
            // A target is sampled through its color attachment
            (Self::RenderTarget, Self::Texture) => true,
            _ => false,
        }
    }

    /// Declaration type in the shading language, if the kind can be a uniform
    pub fn glsl_type(&self) -> Option<&'static str> {
        match self {
            Self::Bool => Some("bool"),
            Self::Int => Some("int"),
            Self::Float => Some("float"),
            Self::Vec2 => Some("vec2"),
            Self::Vec3 => Some("vec3"),
            Self::Vec4 => Some("vec4"),
            Self::Mat4 => Some("mat4"),
            Self::Texture | Self::RenderTarget => Some("sampler2D"),
            Self::Renderer | Self::Camera | Self::String => None,
        }
    }

    /// Whether binding a value of this kind consumes a texture unit
    pub fn is_sampler(&self) -> bool {
        matches!(self, Self::Texture | Self::RenderTarget)
    }
}

/// A value held by an input literal or an output cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// 2D vector
    Vec2([f32; 2]),
    /// 3D vector
    Vec3([f32; 3]),
    /// 4D vector
    Vec4([f32; 4]),
    /// Column-major 4x4 matrix
    Mat4([f32; 16]),
    /// Texture handle
    Texture(TextureId),
    /// Render target
    RenderTarget(RenderTarget),
    /// Render context handle
    Renderer(RendererId),
    /// Camera parameters
    Camera(CameraParams),
    /// String
    String(String),
}

impl Value {
    /// Get the kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Vec2(_) => ValueKind::Vec2,
            Self::Vec3(_) => ValueKind::Vec3,
            Self::Vec4(_) => ValueKind::Vec4,
            Self::Mat4(_) => ValueKind::Mat4,
            Self::Texture(_) => ValueKind::Texture,
            Self::RenderTarget(_) => ValueKind::RenderTarget,
            Self::Renderer(_) => ValueKind::Renderer,
            Self::Camera(_) => ValueKind::Camera,
            Self::String(_) => ValueKind::String,
        }
    }

    /// Get as a render target
    pub fn as_render_target(&self) -> Option<&RenderTarget> {
        match self {
            Self::RenderTarget(target) => Some(target),
            _ => None,
        }
    }

    /// Get as a renderer handle
    pub fn as_renderer(&self) -> Option<RendererId> {
        match self {
            Self::Renderer(id) => Some(*id),
            _ => None,
        }
    }

    /// Get as camera parameters
    pub fn as_camera(&self) -> Option<&CameraParams> {
        match self {
            Self::Camera(camera) => Some(camera),
            _ => None,
        }
    }

    /// Get as a 2D vector, splatting scalars
    pub fn as_vec2(&self) -> Option<[f32; 2]> {
        match self {
            Self::Vec2(v) => Some(*v),
            Self::Float(f) => Some([*f, *f]),
            _ => None,
        }
    }

    /// Texture bound when this value is used as a sampler
    pub fn sampled_texture(&self) -> Option<TextureId> {
        match self {
            Self::Texture(id) => Some(*id),
            Self::RenderTarget(target) => Some(target.color),
            _ => None,
        }
    }
}
