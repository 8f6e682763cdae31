// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic cameras producing a moving test pattern
//!
//! Each virtual camera either streams at a fixed frame rate from a capture
//! loop thread, or (with `fps == 0`) only emits frames when
//! [`VirtualBackend::trigger_frame`] is called. Per-camera counters and
//! one-shot failure injection make the backend usable as a test double for
//! the registry.

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::{
    BackendError, BackendResult, CameraBackendType, CameraDevice, CameraFrame, CameraIndex, CaptureConfig,
    FrameSink, FrameSize,
};
use super::{CaptureBackend, CaptureDevice};
use crate::constants::{capture, virtual_camera};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Description of one synthetic camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualCameraSpec {
    pub name: String,
    pub sizes: Vec<FrameSize>,
    /// Frames per second; 0 means frames are only produced on demand
    pub fps: u32,
}

impl VirtualCameraSpec {
    pub fn new(name: impl Into<String>, sizes: Vec<FrameSize>, fps: u32) -> Self {
        Self {
            name: name.into(),
            sizes,
            fps,
        }
    }

    /// A camera that emits frames only when triggered
    pub fn manual(name: impl Into<String>, sizes: Vec<FrameSize>) -> Self {
        Self::new(name, sizes, 0)
    }
}

impl Default for VirtualCameraSpec {
    fn default() -> Self {
        Self::new(
            "Virtual Camera",
            virtual_camera::DEFAULT_SIZES
                .iter()
                .copied()
                .map(FrameSize::from)
                .collect(),
            virtual_camera::DEFAULT_FPS,
        )
    }
}

/// Hardware operation of a virtual camera, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualOperation {
    Open,
    Configure,
    StartCapture,
    StopCapture,
    Release,
}

/// Snapshot of a virtual camera's lifecycle counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualCounters {
    pub opens: u64,
    pub releases: u64,
    pub starts: u64,
    pub stops: u64,
    pub frames: u64,
}

#[derive(Default)]
struct Counters {
    opens: AtomicU64,
    releases: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    frames: AtomicU64,
}

struct CameraShared {
    index: CameraIndex,
    spec: VirtualCameraSpec,
    counters: Counters,
    failures: Mutex<HashSet<VirtualOperation>>,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    size: Mutex<FrameSize>,
}

impl CameraShared {
    fn check(&self, op: VirtualOperation) -> BackendResult<()> {
        if !self.failures.lock().remove(&op) {
            return Ok(());
        }
        let msg = format!("injected {:?} failure on {}", op, self.index);
        Err(match op {
            VirtualOperation::Open => BackendError::InitializationFailed(msg),
            VirtualOperation::Configure => BackendError::FormatNotSupported(msg),
            VirtualOperation::StartCapture | VirtualOperation::StopCapture => BackendError::StreamFailed(msg),
            VirtualOperation::Release => BackendError::Other(msg),
        })
    }

    /// Push one pattern frame to the current sink
    fn emit(&self) -> bool {
        let Some(sink) = self.sink.lock().clone() else {
            return false;
        };
        let size = *self.size.lock();
        let sequence = self.counters.frames.fetch_add(1, Ordering::SeqCst) + 1;
        sink.on_frame(pattern_frame(size, sequence));
        true
    }
}

/// Diagonal gradient that scrolls by one step per frame
fn pattern_frame(size: FrameSize, sequence: u64) -> CameraFrame {
    let (width, height) = (size.width as usize, size.height as usize);
    let mut data = vec![0u8; width * height * 4];
    let shift = (sequence % 256) as usize;
    for (i, pixel) in data.chunks_exact_mut(4).enumerate() {
        let x = i % width.max(1);
        let y = i / width.max(1);
        pixel[0] = ((x + shift) % 256) as u8;
        pixel[1] = ((y + shift) % 256) as u8;
        pixel[2] = ((x + y) % 256) as u8;
        pixel[3] = 255;
    }
    CameraFrame::rgba(size.width, size.height, sequence, data)
}

/// Backend serving a fixed set of synthetic cameras
pub struct VirtualBackend {
    cameras: Vec<Arc<CameraShared>>,
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new(vec![VirtualCameraSpec::default()])
    }
}

impl VirtualBackend {
    /// One camera per entry, numbered from 0 in order
    pub fn new(specs: Vec<VirtualCameraSpec>) -> Self {
        let cameras = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let size = spec.sizes.first().copied().unwrap_or(FrameSize::new(0, 0));
                Arc::new(CameraShared {
                    index: CameraIndex(i as u32),
                    spec,
                    counters: Counters::default(),
                    failures: Mutex::new(HashSet::new()),
                    sink: Mutex::new(None),
                    size: Mutex::new(size),
                })
            })
            .collect();
        Self { cameras }
    }

    fn camera(&self, index: CameraIndex) -> Option<&Arc<CameraShared>> {
        self.cameras.get(index.0 as usize)
    }

    /// Lifecycle counters of one camera
    pub fn counters(&self, index: CameraIndex) -> Option<VirtualCounters> {
        self.camera(index).map(|cam| VirtualCounters {
            opens: cam.counters.opens.load(Ordering::SeqCst),
            releases: cam.counters.releases.load(Ordering::SeqCst),
            starts: cam.counters.starts.load(Ordering::SeqCst),
            stops: cam.counters.stops.load(Ordering::SeqCst),
            frames: cam.counters.frames.load(Ordering::SeqCst),
        })
    }

    /// Make the next `op` on `index` fail once
    pub fn inject_failure(&self, index: CameraIndex, op: VirtualOperation) {
        if let Some(cam) = self.camera(index) {
            cam.failures.lock().insert(op);
        }
    }

    /// Emit one frame now; `false` if the camera is not streaming
    pub fn trigger_frame(&self, index: CameraIndex) -> bool {
        self.camera(index).is_some_and(|cam| cam.emit())
    }

    /// Whether `index` currently has a stream running
    pub fn is_streaming(&self, index: CameraIndex) -> bool {
        self.camera(index).is_some_and(|cam| cam.sink.lock().is_some())
    }
}

impl CaptureBackend for VirtualBackend {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Virtual
    }

    fn is_available(&self) -> bool {
        true
    }

    fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        self.cameras
            .iter()
            .map(|cam| CameraDevice {
                index: cam.index,
                name: cam.spec.name.clone(),
                path: format!("virtual:{}", cam.index.0),
                driver: "virtual".to_string(),
                sizes: cam.spec.sizes.clone(),
            })
            .collect()
    }

    fn open(&self, index: CameraIndex) -> BackendResult<Box<dyn CaptureDevice>> {
        let cam = self
            .camera(index)
            .ok_or_else(|| BackendError::DeviceNotFound(index.to_string()))?;
        cam.check(VirtualOperation::Open)?;
        cam.counters.opens.fetch_add(1, Ordering::SeqCst);
        info!(index = %index, name = %cam.spec.name, "Opened virtual camera");

        Ok(Box::new(VirtualDevice {
            shared: Arc::clone(cam),
            capture_loop: None,
            released: false,
        }))
    }
}

struct VirtualDevice {
    shared: Arc<CameraShared>,
    capture_loop: Option<CaptureLoopController>,
    released: bool,
}

impl VirtualDevice {
    fn ensure_open(&self) -> BackendResult<()> {
        if self.released {
            Err(BackendError::NotOpen)
        } else {
            Ok(())
        }
    }

    fn halt_stream(&mut self) {
        if let Some(mut controller) = self.capture_loop.take() {
            controller.stop_timeout(capture::STOP_TIMEOUT);
        }
        *self.shared.sink.lock() = None;
    }
}

impl CaptureDevice for VirtualDevice {
    fn supported_sizes(&self) -> BackendResult<Vec<FrameSize>> {
        self.ensure_open()?;
        Ok(self.shared.spec.sizes.clone())
    }

    fn configure(&mut self, config: &CaptureConfig) -> BackendResult<FrameSize> {
        self.ensure_open()?;
        self.shared.check(VirtualOperation::Configure)?;
        if !self.shared.spec.sizes.contains(&config.size) {
            return Err(BackendError::FormatNotSupported(format!(
                "{} does not offer {}",
                self.shared.spec.name, config.size
            )));
        }
        *self.shared.size.lock() = config.size;
        debug!(index = %self.shared.index, size = %config.size, focus = ?config.focus, "Configured virtual camera");
        Ok(config.size)
    }

    fn start_capture(&mut self, sink: Arc<dyn FrameSink>) -> BackendResult<()> {
        self.ensure_open()?;
        self.shared.check(VirtualOperation::StartCapture)?;
        *self.shared.sink.lock() = Some(sink);

        if self.shared.spec.fps > 0 {
            let interval = Duration::from_secs_f64(1.0 / self.shared.spec.fps as f64);
            let shared = Arc::clone(&self.shared);
            let name = format!("virtual-capture-{}", self.shared.index.0);
            let controller = CaptureLoopController::start(&name, move || {
                std::thread::sleep(interval);
                shared.emit();
                LoopAction::Continue
            })
            .map_err(|e| BackendError::StreamFailed(e.to_string()));

            match controller {
                Ok(controller) => self.capture_loop = Some(controller),
                Err(e) => {
                    *self.shared.sink.lock() = None;
                    return Err(e);
                }
            }
        }

        self.shared.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_capture(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        self.shared.check(VirtualOperation::StopCapture)?;
        self.halt_stream();
        self.shared.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        if self.released {
            return Ok(());
        }
        self.shared.check(VirtualOperation::Release)?;
        self.halt_stream();
        self.released = true;
        self.shared.counters.releases.fetch_add(1, Ordering::SeqCst);
        info!(index = %self.shared.index, "Released virtual camera");
        Ok(())
    }
}
