// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::types::{Framerate, Resolution};
use crate::constants::defaults;
use crate::effects::EffectConfig;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Effect applied with AddOrUpdate when the daemon starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialEffect {
    /// Effect type name (e.g. "blur")
    pub effect: String,
    #[serde(default)]
    pub config: EffectConfig,
}

/// Daemon configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture device index (/dev/videoN)
    pub device_index: u32,
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Output framerate
    pub fps: u32,
    /// PipeWire node name of the virtual camera
    pub sink_name: String,
    /// Serve the control interface on the session bus
    pub dbus: bool,
    /// Consecutive failed pushes that stop the pipeline
    pub sink_failure_threshold: u32,
    /// How often the consumer watcher polls PipeWire
    pub consumer_poll_interval_ms: u64,
    /// Initial effect chain
    pub effects: Vec<InitialEffect>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_index: defaults::DEVICE_INDEX,
            width: defaults::WIDTH,
            height: defaults::HEIGHT,
            fps: defaults::FPS,
            sink_name: defaults::SINK_NAME.to_string(),
            dbus: true,
            sink_failure_threshold: defaults::SINK_FAILURE_THRESHOLD,
            consumer_poll_interval_ms: defaults::CONSUMER_POLL_INTERVAL_MS,
            effects: Vec::new(),
        }
    }
}

impl Config {
    /// `~/.config/camfx/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("camfx").join("config.json"))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), effects = config.effects.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check values the pipeline cannot work with
    pub fn validate(&self) -> AppResult<()> {
        if self.fps == 0 {
            return Err(AppError::Config("fps must be greater than zero".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(AppError::Config(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        // Chroma subsampling in the sink needs even dimensions
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(AppError::Config(format!(
                "resolution {}x{} must have even dimensions",
                self.width, self.height
            )));
        }
        if self.sink_name.trim().is_empty() {
            return Err(AppError::Config("sink name must not be empty".into()));
        }
        if self.sink_failure_threshold == 0 {
            return Err(AppError::Config(
                "sink failure threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn framerate(&self) -> Framerate {
        Framerate::from_int(self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::ParamValue;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"width": 640, "height": 480}"#).unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert_eq!(config.fps, defaults::FPS);
        assert_eq!(config.sink_name, defaults::SINK_NAME);
        assert!(config.dbus);
        assert!(config.effects.is_empty());
    }

    #[test]
    fn test_initial_effects_parse() {
        let config: Config = serde_json::from_str(
            r#"{"effects": [
                {"effect": "blur", "config": {"strength": 31}},
                {"effect": "brightness", "config": {"contrast": 1.5, "face_only": true}},
                {"effect": "beautify"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(config.effects.len(), 3);
        assert_eq!(config.effects[0].effect, "blur");
        assert_eq!(
            config.effects[0].config.get("strength"),
            Some(&ParamValue::Int(31))
        );
        assert_eq!(
            config.effects[1].config.get("contrast"),
            Some(&ParamValue::Float(1.5))
        );
        assert_eq!(
            config.effects[1].config.get("face_only"),
            Some(&ParamValue::Bool(true))
        );
        assert!(config.effects[2].config.is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let bad = [
            Config {
                fps: 0,
                ..Config::default()
            },
            Config {
                width: 0,
                ..Config::default()
            },
            Config {
                width: 641,
                ..Config::default()
            },
            Config {
                sink_name: "  ".into(),
                ..Config::default()
            },
            Config {
                sink_failure_threshold: 0,
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(AppError::Config(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("camfx-no-such-dir/config.json");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }
}
