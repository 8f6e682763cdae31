// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{CameraBackendType, FocusMode, FrameSize};
use crate::constants;
use crate::render::RenderSettings;
use crate::shaders::SerializerSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Application directory below the user's config dir
const CONFIG_DIR_NAME: &str = "camera-mux";
const CONFIG_FILE_NAME: &str = "config.json";

/// Guard checks applied to every camera the registry manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    /// Reject operations issued from the wrong device state
    pub state_check: bool,
    /// Keep the hardware open until the last owner closes it
    pub reference_count: bool,
}

/// Render loop timings in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderTimings {
    pub frame_wait_ms: u64,
    pub pause_poll_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for RenderTimings {
    fn default() -> Self {
        Self {
            frame_wait_ms: constants::render::FRAME_WAIT_TIMEOUT.as_millis() as u64,
            pause_poll_ms: constants::render::PAUSE_POLL_INTERVAL.as_millis() as u64,
            join_timeout_ms: constants::render::JOIN_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Filter serializer queue settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterQueueSettings {
    /// Tasks allowed to wait before submissions are rejected
    pub queue_capacity: usize,
    pub wait_poll_ms: u64,
    pub quit_timeout_ms: u64,
}

impl Default for FilterQueueSettings {
    fn default() -> Self {
        Self {
            queue_capacity: constants::serializer::QUEUE_CAPACITY,
            wait_poll_ms: constants::serializer::WAIT_POLL_INTERVAL.as_millis() as u64,
            quit_timeout_ms: constants::serializer::QUIT_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use (virtual or V4L2)
    pub backend: CameraBackendType,
    /// Preview resolution the size chooser aims for
    pub preview_size: FrameSize,
    /// Focus mode applied when a camera is configured
    pub focus: FocusMode,
    pub guard: GuardSettings,
    pub render: RenderTimings,
    pub filter: FilterQueueSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            preview_size: FrameSize::new(constants::DEFAULT_PREVIEW_WIDTH, constants::DEFAULT_PREVIEW_HEIGHT),
            focus: FocusMode::default(),
            guard: GuardSettings::default(),
            render: RenderTimings::default(),
            filter: FilterQueueSettings::default(),
        }
    }
}

impl Config {
    /// Default location of the config file, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, or from [`default_path`](Self::default_path)
    ///
    /// A missing file gives the defaults; an unreadable or malformed one is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    debug!("No config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        config.validate()?;

        info!(path = %path.display(), backend = %config.backend, "Loaded configuration");
        Ok(config)
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |e: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(io_error)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview_size.width == 0 || self.preview_size.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "preview size {} has a zero dimension",
                self.preview_size
            )));
        }
        if self.filter.queue_capacity == 0 {
            return Err(ConfigError::Invalid("filter queue capacity must be at least 1".to_string()));
        }
        if self.render.frame_wait_ms == 0 || self.render.pause_poll_ms == 0 || self.render.join_timeout_ms == 0 {
            return Err(ConfigError::Invalid("render wait intervals must be non-zero".to_string()));
        }
        if self.filter.wait_poll_ms == 0 || self.filter.quit_timeout_ms == 0 {
            return Err(ConfigError::Invalid("filter wait intervals must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            frame_wait_timeout: Duration::from_millis(self.render.frame_wait_ms),
            pause_poll_interval: Duration::from_millis(self.render.pause_poll_ms),
            join_timeout: Duration::from_millis(self.render.join_timeout_ms),
        }
    }

    pub fn serializer_settings(&self) -> SerializerSettings {
        SerializerSettings {
            capacity: self.filter.queue_capacity,
            wait_poll_interval: Duration::from_millis(self.filter.wait_poll_ms),
            quit_timeout: Duration::from_millis(self.filter.quit_timeout_ms),
        }
    }
}

/// Configuration loading failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, message } => write!(f, "Cannot access {}: {}", path.display(), message),
            ConfigError::Parse { path, message } => write!(f, "Malformed config {}: {}", path.display(), message),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
