//! Compositor configuration loaded from TOML.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::buffers::BufferCollectionImportMode;

/// Tunable policy for the compositor core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// How client buffer collections are shared with the display controller.
    pub import_mode: BufferCollectionImportMode,

    /// Force GPU composition for every frame, never attempting direct
    /// scanout of client images.
    pub disable_direct_scanout: bool,

    /// Tint GPU-composited frames so fallback frames are visually obvious.
    pub visual_debugging: bool,

    /// Multiply color applied to every image when `visual_debugging` is set.
    pub gpu_debug_color: [f32; 4],

    /// Allocate render targets with CPU-readable memory, for screenshot and
    /// test tooling.
    pub cpu_readable_render_targets: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            import_mode: BufferCollectionImportMode::default(),
            disable_direct_scanout: false,
            visual_debugging: false,
            gpu_debug_color: [0.9, 0.5, 0.5, 1.0],
            cpu_readable_render_targets: false,
        }
    }
}

impl CompositorConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: CompositorConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (i, channel) in self.gpu_debug_color.iter().enumerate() {
            if !(0.0..=1.0).contains(channel) {
                anyhow::bail!(
                    "Invalid gpu_debug_color channel {i}: {channel} must be between 0.0 and 1.0"
                );
            }
        }
        Ok(())
    }
}
