// SPDX-License-Identifier: MIT OR Apache-2.0
//! Render backend boundary.
//!
//! The graph core never talks to a GPU API directly. A frame driver owns
//! one [`RenderBackend`] and hands it to every node through
//! [`crate::FrameContext`]; nodes allocate targets, compile programs and
//! issue full-screen draws through it.

mod headless;

pub use headless::{Command, HeadlessBackend};

use crate::value::{RenderTarget, Value};
use indexmap::IndexMap;

/// Handle to a compiled program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

/// Source text of a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    /// Vertex stage, shared by all full-screen passes
    pub vertex: String,
    /// Fragment stage
    pub fragment: String,
}

/// Uniform name to value bindings for one draw
pub type UniformBindings = IndexMap<String, Value>;

/// Operations the graph needs from a rendering backend
pub trait RenderBackend {
    /// Compile a program from source
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, BackendError>;

    /// Allocate an intermediate render target
    fn allocate_target(&mut self, width: u32, height: u32, with_depth: bool) -> RenderTarget;

    /// Bind a target for subsequent draws; `None` binds the final surface
    fn bind_target(&mut self, target: Option<&RenderTarget>);

    /// Clear the bound target
    fn clear(&mut self);

    /// Bind uniform values onto a program
    fn bind_uniforms(
        &mut self,
        program: ProgramId,
        uniforms: &UniformBindings,
    ) -> Result<(), BackendError>;

    /// Draw the canonical full-screen quad with a program
    fn draw_fullscreen_quad(&mut self, program: ProgramId) -> Result<(), BackendError>;

    /// Set the active camera's clipping planes
    fn set_camera_planes(&mut self, near: f32, far: f32);

    /// Active camera's `(near, far)` clipping planes
    fn camera_planes(&self) -> (f32, f32);

    /// Number of samplers one draw can bind
    fn max_texture_units(&self) -> usize;
}

/// Backend failures
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Program handle was never issued by this backend
    #[error("Unknown program: {0:?}")]
    UnknownProgram(ProgramId),

    /// Program failed to compile
    #[error("Program compilation failed: {0}")]
    Compile(String),
}
