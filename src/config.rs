// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing or partial config.toml is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

use crate::frame::FormatRequest;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Pacer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Tried before the built-in mailbox -> FIFO order
    pub present_mode: String,
    pub srgb: bool,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Expiry is treated as a lost device
    pub fence_timeout_ns: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            srgb: true,
            clear_color: [0.1, 0.2, 0.8, 1.0],
            max_frames_in_flight: 2,
            fence_timeout_ns: u64::MAX,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults on any error
    ///
    /// Runs before logging is initialized, so a load failure is handed back
    /// for the caller to report once it can.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path; a missing file means defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode, `None` when unset or unrecognized
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
            "" => None,
            other => {
                log::warn!("Unknown present mode '{}', using default selection", other);
                None
            }
        }
    }

    pub fn format_request(&self) -> FormatRequest {
        if self.graphics.srgb {
            FormatRequest::srgb()
        } else {
            FormatRequest::unorm()
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
