// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::Timeouts;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub animation: AnimationConfig,
    pub debug: DebugConfig,
}

/// Window settings. The window is fixed-size.
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
            title: "Frame Pacer".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    /// Absent: wait for the next image forever
    pub acquire_timeout_ms: Option<u64>,
    /// Absent: wait for a slot's previous frame forever
    pub fence_timeout_ms: Option<u64>,
    /// Directory holding shader.vert.spv and shader.frag.spv
    pub shader_dir: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.1, 0.1, 0.1, 1.0],
            acquire_timeout_ms: None,
            fence_timeout_ms: None,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

/// Animation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Radians added to each animated axis per frame
    pub step: f32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self { step: 0.01 }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    /// Stop after this many frames
    pub frame_limit: Option<u64>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
            frame_limit: None,
        }
    }
}

/// Where the active configuration came from.
///
/// Loading happens before the logger exists, so the outcome is kept and
/// reported once logging is up.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// The file exists but could not be used; defaults are active.
    Invalid { path: PathBuf, error: anyhow::Error },
}

impl ConfigSource {
    pub fn report(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => log::info!("Config file not found at {:?}, using defaults", path),
            ConfigSource::Invalid { path, error } => {
                log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, error)
            }
        }
    }
}

impl Config {
    /// Load configuration from config.toml, falling back to defaults
    pub fn load() -> (Self, ConfigSource) {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific path, falling back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path));
        }

        match Self::read(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(error) => (Config::default(), ConfigSource::Invalid { path, error }),
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Frame engine wait bounds
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            acquire: self.graphics.acquire_timeout_ms.map(Duration::from_millis),
            fence: self.graphics.fence_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Log filter from `debug.log_level`, Info when unrecognized
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            eprintln!("Unknown log level '{}', using info", self.debug.log_level);
            log::LevelFilter::Info
        })
    }
}
