// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │ Viewers (preview widgets)│
//! └────────────┬─────────────┘
//!              │ open / startPreview / attach
//!              ▼
//! ┌──────────────────────────┐
//! │  CameraResourceRegistry  │  ← Guard state machine, reference counts
//! └────────────┬─────────────┘
//!              │ one handle per index
//!              ▼
//! ┌──────────────────────────┐
//! │   CaptureDeviceHandle    │  ← Negotiated size, capture on/off, release
//! └────────────┬─────────────┘
//!              │
//!              ▼
//! ┌──────────────────────────┐
//! │ CaptureBackend / Device  │  ← Common interface
//! └────────────┬─────────────┘
//!         ┌────┴─────┐
//!         ▼          ▼
//!     ┌───────┐ ┌─────────┐
//!     │ V4L2  │ │ Virtual │
//!     └───────┘ └─────────┘
//! ```

pub mod device;
pub mod frame_loop;
pub mod guard;
pub mod registry;
pub mod size_chooser;
pub mod types;
pub mod v4l2;
pub mod virtual_device;

pub use device::CaptureDeviceHandle;
pub use guard::{DeviceState, GuardEntry, GuardMode};
pub use registry::CameraResourceRegistry;
pub use size_chooser::{CachedSizeChooser, NearestSizeChooser, SizeChooser};
pub use types::*;
pub use virtual_device::{VirtualBackend, VirtualCameraSpec, VirtualCounters, VirtualOperation};

use std::sync::Arc;

/// Entry point to one family of capture hardware
pub trait CaptureBackend: Send + Sync {
    /// Get the backend type identifier
    fn backend_type(&self) -> CameraBackendType;

    /// Check if this backend is usable on the current system
    fn is_available(&self) -> bool;

    /// Enumerate available cameras on this backend
    fn enumerate_cameras(&self) -> Vec<CameraDevice>;

    /// Open the physical device behind `index`
    ///
    /// The returned device is not yet configured or streaming.
    fn open(&self, index: CameraIndex) -> BackendResult<Box<dyn CaptureDevice>>;
}

/// One opened physical camera
///
/// Implementations only need the synchronization their OS capture API
/// requires; the registry never calls into a device concurrently.
pub trait CaptureDevice: Send {
    /// Frame sizes the hardware can deliver
    fn supported_sizes(&self) -> BackendResult<Vec<FrameSize>>;

    /// Apply preview size and focus mode, returning the size the hardware accepted
    fn configure(&mut self, config: &CaptureConfig) -> BackendResult<FrameSize>;

    /// Start delivering frames to `sink` from the device's own thread
    fn start_capture(&mut self, sink: Arc<dyn FrameSink>) -> BackendResult<()>;

    /// Stop frame delivery; a stopped device can be started again
    fn stop_capture(&mut self) -> BackendResult<()>;

    /// Release the hardware; the device is unusable afterwards
    fn release(&mut self) -> BackendResult<()>;
}

/// Get a concrete backend instance for a backend type
pub fn get_backend_for_type(backend_type: CameraBackendType) -> Arc<dyn CaptureBackend> {
    match backend_type {
        CameraBackendType::Virtual => Arc::new(VirtualBackend::default()),
        CameraBackendType::V4l2 => Arc::new(v4l2::V4l2Backend::new()),
    }
}
