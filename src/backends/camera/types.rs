// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Identifies one physical camera for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CameraIndex(pub u32);

impl std::fmt::Display for CameraIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "camera{}", self.0)
    }
}

impl From<u32> for CameraIndex {
    fn from(index: u32) -> Self {
        CameraIndex(index)
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; zero for a degenerate size
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for FrameSize {
    fn from((width, height): (u32, u32)) -> Self {
        FrameSize::new(width, height)
    }
}

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraBackendType {
    /// Synthetic test-pattern cameras
    #[default]
    Virtual,
    /// Video4Linux2 capture nodes
    V4l2,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::Virtual => write!(f, "virtual"),
            CameraBackendType::V4l2 => write!(f, "v4l2"),
        }
    }
}

impl std::str::FromStr for CameraBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "virtual" | "test" => Ok(CameraBackendType::Virtual),
            "v4l2" | "v4l" => Ok(CameraBackendType::V4l2),
            other => Err(format!("unknown camera backend '{}'", other)),
        }
    }
}

/// Focus behaviour requested when a device is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FocusMode {
    /// Continuous autofocus suited to a live preview
    #[default]
    Continuous,
    /// Autofocus disabled, lens left where it is
    Fixed,
    /// Autofocus disabled, lens driven to its far end
    Infinity,
}

/// Settings applied to a freshly opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub size: FrameSize,
    pub focus: FocusMode,
}

/// Represents a camera device as reported by enumeration
#[derive(Debug, Clone)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub name: String,
    pub path: String,     // Device node or synthetic identifier
    pub driver: String,   // Kernel driver, "virtual" for synthetic cameras
    pub sizes: Vec<FrameSize>,
}

/// Pixel layout of captured frame data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// RGB24 - 24-bit RGB (3 bytes per pixel, no alpha)
    RGB24,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    YUYV,
    /// UYVY - Packed 4:2:2 (U Y0 V Y1 interleaved)
    UYVY,
    /// NV12 - Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    NV12,
    /// Gray8 - 8-bit grayscale (single channel)
    Gray8,
    /// Motion JPEG, one compressed image per frame
    MJPEG,
}

impl PixelFormat {
    /// Map a V4L2 FourCC code to a pixel format
    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGBA" | b"AB24" => Some(Self::RGBA),
            b"RGB3" => Some(Self::RGB24),
            b"YUYV" => Some(Self::YUYV),
            b"UYVY" => Some(Self::UYVY),
            b"NV12" => Some(Self::NV12),
            b"GREY" => Some(Self::Gray8),
            b"MJPG" | b"JPEG" => Some(Self::MJPEG),
            _ => None,
        }
    }

    /// Average bytes per pixel (accounting for chroma subsampling)
    ///
    /// Returns `None` for compressed formats.
    pub fn bytes_per_pixel(&self) -> Option<f32> {
        match self {
            Self::RGBA => Some(4.0),
            Self::RGB24 => Some(3.0),
            Self::YUYV | Self::UYVY => Some(2.0),
            Self::NV12 => Some(1.5),
            Self::Gray8 => Some(1.0),
            Self::MJPEG => None,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RGBA => "RGBA",
            Self::RGB24 => "RGB24",
            Self::YUYV => "YUYV",
            Self::UYVY => "UYVY",
            Self::NV12 => "NV12",
            Self::Gray8 => "GRAY8",
            Self::MJPEG => "MJPEG",
        };
        write!(f, "{}", name)
    }
}

/// A single frame from the camera
///
/// The pixel data is reference counted, so cloning a frame to hand it to
/// several consumers never copies pixels.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row stride for the main data (bytes per row, may include padding)
    pub stride: u32,
    /// Monotonic per-device frame number, starting at 1
    pub sequence: u64,
    pub data: Arc<[u8]>,
    /// Timestamp when frame was captured (for latency diagnostics)
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a tightly packed RGBA frame
    pub fn rgba(width: u32, height: u32, sequence: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::RGBA,
            stride: width * 4,
            sequence,
            data: data.into(),
            captured_at: Instant::now(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Receives frames from a capture device, on the device's delivery thread
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: CameraFrame);
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Failed to open or initialize the device
    InitializationFailed(String),
    /// Format not supported
    FormatNotSupported(String),
    /// Capture stream could not be started or stopped
    StreamFailed(String),
    /// Operation needs a device that is not open
    NotOpen,
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::StreamFailed(msg) => write!(f, "Stream failed: {}", msg),
            BackendError::NotOpen => write!(f, "Device is not open"),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}
