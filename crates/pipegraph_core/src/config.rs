// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline configuration, stored as RON.

use crate::node::kinds;
use crate::shader::{FragmentShaderParts, Precision};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current configuration format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Error loading a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid RON for [`PipelineConfig`]
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Written by a newer format
    #[error("Configuration version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Highest supported version
        supported: u32,
    },
}

/// Program assembly settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Float precision of generated programs
    pub precision: Precision,
}

/// Optimizer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Whether rewrites run at all
    pub enabled: bool,
    /// Upper bound on rewrites per run
    pub max_rewrites: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rewrites: 64,
        }
    }
}

/// Headless backend and view settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels
    pub height: u32,
    /// Sampler units available to one draw
    pub max_texture_units: usize,
    /// Camera near plane
    pub near: f32,
    /// Camera far plane
    pub far: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            max_texture_units: 16,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// One full-screen effect of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Node name
    pub name: String,
    /// Node type tag
    pub kind: String,
    /// Program description
    pub parts: FragmentShaderParts,
    /// Literal uniform values
    pub uniforms: IndexMap<String, Value>,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: kinds::SCREEN_SHADER.to_string(),
            parts: FragmentShaderParts::default(),
            uniforms: IndexMap::new(),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Format version
    pub version: u32,
    /// Program assembly
    pub shader: ShaderConfig,
    /// Optimizer
    pub optimizer: OptimizerConfig,
    /// Backend and view
    pub backend: BackendConfig,
    /// Frames to evaluate
    pub frames: u64,
    /// Effect chain, first applied first
    pub effects: Vec<EffectConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            shader: ShaderConfig::default(),
            optimizer: OptimizerConfig::default(),
            backend: BackendConfig::default(),
            frames: 3,
            effects: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Parse from RON text
    pub fn from_ron(s: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(s)?;
        if config.version > CONFIG_FORMAT_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }
        Ok(config)
    }

    /// Serialize to pretty RON
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }
}
