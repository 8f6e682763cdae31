// SPDX-License-Identifier: GPL-3.0-only

//! Error types shared across the crate

use crate::backends::camera::{BackendError, CameraIndex};
use crate::config::ConfigError;
use crate::gpu::GpuError;
use crate::render::RenderError;
use crate::shaders::FilterError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Registry operation that touched the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOperation {
    Open,
    StartPreview,
    StopPreview,
    Close,
    Attach,
}

impl fmt::Display for DeviceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceOperation::Open => write!(f, "open"),
            DeviceOperation::StartPreview => write!(f, "start preview"),
            DeviceOperation::StopPreview => write!(f, "stop preview"),
            DeviceOperation::Close => write!(f, "close"),
            DeviceOperation::Attach => write!(f, "attach"),
        }
    }
}

/// A camera hardware failure surfaced by the registry
///
/// When this is returned the registry's guard state for the index is
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub index: CameraIndex,
    pub operation: DeviceOperation,
    pub source: BackendError,
}

impl DeviceError {
    pub fn new(index: CameraIndex, operation: DeviceOperation, source: BackendError) -> Self {
        Self {
            index,
            operation,
            source,
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to {} {}: {}", self.operation, self.index, self.source)
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Why a task was not accepted by the serializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The bounded queue is at capacity
    QueueFull,
    /// The serializer has quit
    ShutDown,
    /// The caller stopped waiting before the task completed
    TimedOut,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull => write!(f, "Task queue is full"),
            SubmitError::ShutDown => write!(f, "Task serializer has shut down"),
            SubmitError::TimedOut => write!(f, "Timed out waiting for task result"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    Device(DeviceError),
    Backend(BackendError),
    Gpu(GpuError),
    Render(RenderError),
    Filter(FilterError),
    Submit(SubmitError),
    Config(ConfigError),
    /// Image file could not be read or written
    Image(String),
    /// Generic error with message
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Device(e) => write!(f, "Device error: {}", e),
            AppError::Backend(e) => write!(f, "Backend error: {}", e),
            AppError::Gpu(e) => write!(f, "GPU error: {}", e),
            AppError::Render(e) => write!(f, "Render error: {}", e),
            AppError::Filter(e) => write!(f, "Filter error: {}", e),
            AppError::Submit(e) => write!(f, "Submit error: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Image(msg) => write!(f, "Image error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<DeviceError> for AppError {
    fn from(err: DeviceError) -> Self {
        AppError::Device(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Backend(err)
    }
}

impl From<GpuError> for AppError {
    fn from(err: GpuError) -> Self {
        AppError::Gpu(err)
    }
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::Render(err)
    }
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::Filter(err)
    }
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        AppError::Submit(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Image(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
