// SPDX-License-Identifier: MIT OR Apache-2.0
//! Full-screen shader passes.

pub mod assembly;
mod parts;
mod pass;

pub use assembly::{build_fragment_shader, Precision};
pub use parts::{FragmentShaderParts, UniformSlot, UniformSource};
pub use pass::{Program, ShaderPass, RENDERER_INPUT, TARGET_INPUT};

use crate::value::ValueKind;

/// Error assembling a program
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderError {
    /// Main body is empty
    #[error("Fragment parts have no main body")]
    MissingMain,

    /// Uniform kind has no declaration in the shading language
    #[error("Uniform {name} of kind {kind:?} cannot be declared")]
    UndeclarableUniform {
        /// Uniform name
        name: String,
        /// Its kind
        kind: ValueKind,
    },

    /// Name is not a valid identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Name clashes with a built-in declaration
    #[error("Uniform name {0} is reserved")]
    ReservedName(String),
}
