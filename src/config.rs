// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section has defaults, so a missing file or a missing key still
// produces a runnable configuration. Frames in flight is fixed at compile
// time and deliberately absent here.

use anyhow::{Context, Result};
use glam::{Vec2, Vec4};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::ContextOptions;
use crate::point::PointRenderData;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub debug: DebugConfig,
    pub device: DeviceConfig,
    pub shaders: ShaderConfig,
    pub point: PointConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Point Renderer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    pub object_names: bool,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            object_names: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
        }
    }
}

/// Device requirements
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    /// Also require timeline semaphores, descriptor indexing and dynamic rendering
    pub require_extended_features: bool,
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/point.vert.spv"),
            fragment: PathBuf::from("shaders/point.frag.spv"),
        }
    }
}

/// The point drawn every frame
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PointConfig {
    /// Clip space, [-1, 1] on both axes
    pub position: [f32; 2],
    /// Pixels
    pub size: f32,
    pub color: [f32; 4],
}

impl Default for PointConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0],
            size: 24.0,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl PointConfig {
    pub fn to_point(&self) -> PointRenderData {
        PointRenderData::new(Vec2::from(self.position), self.size, Vec4::from(self.color))
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Bootstrap switches; validation is never enabled in release builds
    pub fn context_options(&self) -> ContextOptions {
        let validation = cfg!(debug_assertions) && self.debug.validation_layers;
        ContextOptions {
            validation,
            object_names: validation && self.debug.object_names,
            extended_features: self.device.require_extended_features,
        }
    }
}
