// SPDX-License-Identifier: GPL-3.0-only

//! Video4Linux2 capture backend
//!
//! Cameras are the `/dev/video*` nodes advertising video capture, numbered in
//! node order. Each stream runs on a capture loop thread that opens its own
//! device handle and mmap stream.

pub mod controls;

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::types::{
    BackendError, BackendResult, CameraBackendType, CameraDevice, CameraFrame, CameraIndex, CaptureConfig,
    FrameSink, FrameSize, PixelFormat,
};
use super::{CaptureBackend, CaptureDevice};
use crate::constants::capture;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// Sizes tried against stepwise/continuous frame size ranges
const STEPWISE_CANDIDATES: &[(u32, u32)] = &[(320, 240), (640, 480), (800, 600), (1280, 720), (1920, 1080)];

/// Capture formats in order of preference
const PREFERRED_FOURCCS: &[&[u8; 4]] = &[b"YUYV", b"MJPG"];

/// Backend over the kernel's V4L2 capture nodes
#[derive(Debug, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }

    /// Capture-capable device nodes, sorted by node number
    fn capture_nodes(&self) -> Vec<(String, v4l::capability::Capabilities)> {
        let entries = match std::fs::read_dir("/dev") {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Cannot list /dev");
                return Vec::new();
            }
        };

        let mut nodes: Vec<(u32, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let number = name.strip_prefix("video")?.parse::<u32>().ok()?;
                Some((number, format!("/dev/{}", name)))
            })
            .collect();
        nodes.sort();

        nodes
            .into_iter()
            .filter_map(|(_, path)| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then_some((path, caps))
            })
            .collect()
    }

    fn node_for(&self, index: CameraIndex) -> BackendResult<String> {
        self.capture_nodes()
            .into_iter()
            .nth(index.0 as usize)
            .map(|(path, _)| path)
            .ok_or_else(|| BackendError::DeviceNotFound(format!("no V4L2 capture node for {}", index)))
    }
}

/// Pick the capture format and list its frame sizes
fn probe_formats(dev: &Device) -> BackendResult<(FourCC, Vec<FrameSize>)> {
    let available: Vec<FourCC> = dev.enum_formats()?.into_iter().map(|desc| desc.fourcc).collect();

    let fourcc = PREFERRED_FOURCCS
        .iter()
        .map(|code| FourCC::new(*code))
        .find(|fourcc| available.contains(fourcc))
        .or_else(|| available.first().copied())
        .ok_or_else(|| BackendError::FormatNotSupported("device lists no capture formats".to_string()))?;

    let mut sizes = Vec::new();
    for size in dev.enum_framesizes(fourcc)? {
        match size.size {
            v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                sizes.push(FrameSize::new(discrete.width, discrete.height));
            }
            v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                for &(w, h) in STEPWISE_CANDIDATES {
                    if w >= step.min_width && w <= step.max_width && h >= step.min_height && h <= step.max_height {
                        sizes.push(FrameSize::new(w, h));
                    }
                }
            }
        }
    }
    sizes.sort_by_key(|s| (s.width, s.height));
    sizes.dedup();

    Ok((fourcc, sizes))
}

impl CaptureBackend for V4l2Backend {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::V4l2
    }

    fn is_available(&self) -> bool {
        Path::new("/dev").exists() && !self.capture_nodes().is_empty()
    }

    fn enumerate_cameras(&self) -> Vec<CameraDevice> {
        let cameras: Vec<CameraDevice> = self
            .capture_nodes()
            .into_iter()
            .enumerate()
            .map(|(i, (path, caps))| {
                let sizes = Device::with_path(&path)
                    .map_err(BackendError::from)
                    .and_then(|dev| probe_formats(&dev))
                    .map(|(_, sizes)| sizes)
                    .unwrap_or_default();
                CameraDevice {
                    index: CameraIndex(i as u32),
                    name: caps.card.clone(),
                    path,
                    driver: caps.driver.clone(),
                    sizes,
                }
            })
            .collect();

        info!(count = cameras.len(), "Enumerated V4L2 cameras");
        cameras
    }

    fn open(&self, index: CameraIndex) -> BackendResult<Box<dyn CaptureDevice>> {
        let path = self.node_for(index)?;
        let dev = Device::with_path(&path)
            .map_err(|e| BackendError::InitializationFailed(format!("{}: {}", path, e)))?;
        let (fourcc, sizes) = probe_formats(&dev)?;

        info!(index = %index, path = %path, fourcc = %fourcc, sizes = sizes.len(), "Opened V4L2 device");

        Ok(Box::new(V4l2Device {
            index,
            path,
            fourcc,
            sizes,
            configured: None,
            capture_loop: None,
            released: false,
        }))
    }
}

struct V4l2Device {
    index: CameraIndex,
    path: String,
    fourcc: FourCC,
    sizes: Vec<FrameSize>,
    configured: Option<Format>,
    capture_loop: Option<CaptureLoopController>,
    released: bool,
}

impl V4l2Device {
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
    }
}

/// Capture thread state; lives and dies on the capture thread
struct StreamState {
    stream: Stream<'static>,
    // Keeps the handle the stream was created from alive
    _device: Device,
    format: Format,
    pixel_format: PixelFormat,
    frames: u64,
}

fn open_stream(path: &str, format: Format) -> Result<StreamState, String> {
    let device = Device::with_path(path).map_err(|e| format!("Failed to open {}: {}", path, e))?;
    let format = device
        .set_format(&format)
        .map_err(|e| format!("Failed to set format: {}", e))?;
    let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
        .ok_or_else(|| format!("Unsupported pixel format {}", format.fourcc))?;
    let stream = Stream::with_buffers(&device, Type::VideoCapture, capture::V4L2_BUFFER_COUNT)
        .map_err(|e| format!("Failed to create stream: {}", e))?;

    Ok(StreamState {
        stream,
        _device: device,
        format,
        pixel_format,
        frames: 0,
    })
}

fn capture_one(state: &mut StreamState, sink: &dyn FrameSink) -> LoopAction {
    let (buf, meta) = match state.stream.next() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Failed to capture V4L2 frame");
            return LoopAction::Continue;
        }
    };

    let used = (meta.bytesused as usize).min(buf.len());
    let data = if used > 0 { &buf[..used] } else { buf };
    let frame = CameraFrame {
        width: state.format.width,
        height: state.format.height,
        format: state.pixel_format,
        stride: state.format.stride,
        sequence: meta.sequence as u64 + 1,
        data: Arc::from(data),
        captured_at: Instant::now(),
    };

    state.frames += 1;
    if state.frames % capture::FRAME_LOG_INTERVAL == 0 {
        debug!(frames = state.frames, sequence = frame.sequence, "V4L2 capture running");
    }

    sink.on_frame(frame);
    LoopAction::Continue
}

impl CaptureDevice for V4l2Device {
    fn supported_sizes(&self) -> BackendResult<Vec<FrameSize>> {
        self.ensure_open()?;
        Ok(self.sizes.clone())
    }

    fn configure(&mut self, config: &CaptureConfig) -> BackendResult<FrameSize> {
        self.ensure_open()?;
        let dev = Device::with_path(&self.path)?;
        let requested = Format::new(config.size.width, config.size.height, self.fourcc);
        let actual = dev
            .set_format(&requested)
            .map_err(|e| BackendError::FormatNotSupported(format!("{}: {}", config.size, e)))?;

        controls::apply_focus(&self.path, config.focus);

        let size = FrameSize::new(actual.width, actual.height);
        if size != config.size {
            info!(index = %self.index, requested = %config.size, actual = %size, "Driver adjusted preview size");
        }
        self.configured = Some(actual);
        Ok(size)
    }

    fn start_capture(&mut self, sink: Arc<dyn FrameSink>) -> BackendResult<()> {
        self.ensure_open()?;
        let format = self
            .configured
            .ok_or_else(|| BackendError::StreamFailed("device was not configured".to_string()))?;
        let path = self.path.clone();
        let name = format!("v4l2-capture-{}", self.index.0);

        let controller = CaptureLoopController::try_start_with_init(
            &name,
            capture::INIT_TIMEOUT,
            move || open_stream(&path, format),
            move |state: &mut StreamState| capture_one(state, sink.as_ref()),
        )
        .map_err(BackendError::StreamFailed)?;

        self.capture_loop = Some(controller);
        Ok(())
    }

    fn stop_capture(&mut self) -> BackendResult<()> {
        self.ensure_open()?;
        self.halt_stream();
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        if self.released {
            return Ok(());
        }
        self.halt_stream();
        self.released = true;
        info!(index = %self.index, path = %self.path, "Released V4L2 device");
        Ok(())
    }
}
