// SPDX-License-Identifier: GPL-3.0-only

//! Handle around one opened physical camera

use super::size_chooser::SizeChooser;
use super::types::{BackendError, BackendResult, CameraIndex, CaptureConfig, FocusMode, FrameSink, FrameSize};
use super::{CaptureBackend, CaptureDevice};
use std::sync::Arc;
use tracing::{info, warn};

/// An opened, configured camera owned by the registry
///
/// Opening negotiates the preview size once; the size stays fixed for the
/// lifetime of the handle.
pub struct CaptureDeviceHandle {
    index: CameraIndex,
    frame_size: FrameSize,
    device: Box<dyn CaptureDevice>,
    capturing: bool,
    released: bool,
}

impl CaptureDeviceHandle {
    /// Open `index`, choose a preview size and apply the focus mode
    pub fn open(
        backend: &dyn CaptureBackend,
        index: CameraIndex,
        chooser: &dyn SizeChooser,
        focus: FocusMode,
    ) -> BackendResult<Self> {
        let mut device = backend.open(index)?;

        let negotiated = Self::negotiate(device.as_mut(), chooser, focus);
        let frame_size = match negotiated {
            Ok(size) => size,
            Err(e) => {
                // Hand the hardware back before reporting the failure
                if let Err(release_err) = device.release() {
                    warn!(index = %index, error = %release_err, "Failed to release device after failed configuration");
                }
                return Err(e);
            }
        };

        info!(
            index = %index,
            backend = %backend.backend_type(),
            size = %frame_size,
            focus = ?focus,
            "Opened capture device"
        );

        Ok(Self {
            index,
            frame_size,
            device,
            capturing: false,
            released: false,
        })
    }

    fn negotiate(
        device: &mut dyn CaptureDevice,
        chooser: &dyn SizeChooser,
        focus: FocusMode,
    ) -> BackendResult<FrameSize> {
        let candidates = device.supported_sizes()?;
        let size = chooser.choose(&candidates).ok_or_else(|| {
            BackendError::FormatNotSupported(format!(
                "no acceptable preview size among {} candidates",
                candidates.len()
            ))
        })?;
        device.configure(&CaptureConfig { size, focus })
    }

    pub fn index(&self) -> CameraIndex {
        self.index
    }

    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Start streaming into `sink`; a no-op if already streaming
    pub fn start_capture(&mut self, sink: Arc<dyn FrameSink>) -> BackendResult<()> {
        if self.released {
            return Err(BackendError::NotOpen);
        }
        if self.capturing {
            return Ok(());
        }
        self.device.start_capture(sink)?;
        self.capturing = true;
        info!(index = %self.index, "Capture started");
        Ok(())
    }

    /// Stop streaming; a no-op if not streaming
    pub fn stop_capture(&mut self) -> BackendResult<()> {
        if !self.capturing {
            return Ok(());
        }
        self.device.stop_capture()?;
        self.capturing = false;
        info!(index = %self.index, "Capture stopped");
        Ok(())
    }

    /// Stop any stream and release the hardware
    ///
    /// Idempotent. After an error the handle stays unreleased so the caller
    /// may retry.
    pub fn release(&mut self) -> BackendResult<()> {
        if self.released {
            return Ok(());
        }
        self.stop_capture()?;
        self.device.release()?;
        self.released = true;
        info!(index = %self.index, "Capture device released");
        Ok(())
    }
}

impl Drop for CaptureDeviceHandle {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                warn!(index = %self.index, error = %e, "Failed to release capture device on drop");
            }
        }
    }
}

impl std::fmt::Debug for CaptureDeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDeviceHandle")
            .field("index", &self.index)
            .field("frame_size", &self.frame_size)
            .field("capturing", &self.capturing)
            .field("released", &self.released)
            .finish()
    }
}
