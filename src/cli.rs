// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Previewing one camera in several headless viewers
//! - Filtering image files

use camera_mux::backends::camera::{
    BackendError, CameraIndex, CameraResourceRegistry, NearestSizeChooser, get_backend_for_type,
};
use camera_mux::config::Config;
use camera_mux::constants::get_resolution_label;
use camera_mux::errors::{AppError, AppResult};
use camera_mux::gpu::{DisplaySurface, RenderContext, SoftwareContextFactory, TextureHandle};
use camera_mux::render::{ConsumerId, RenderConsumer, RenderError};
use camera_mux::shaders::{FilterError, FilterPipeline, FilterType};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// List all available cameras
pub fn list_cameras(config: &Config) -> AppResult<()> {
    let backend = get_backend_for_type(config.backend);
    if !backend.is_available() {
        println!("Backend {} is not available on this system.", config.backend);
        return Ok(());
    }

    let cameras = backend.enumerate_cameras();
    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras ({}):", config.backend);
    println!();
    for camera in &cameras {
        println!("  [{}] {} ({})", camera.index.0, camera.name, camera.path);

        // Largest sizes first
        let mut sizes = camera.sizes.clone();
        sizes.sort_by_key(|size| std::cmp::Reverse(size.pixel_count()));
        let size_strs: Vec<String> = sizes
            .iter()
            .map(|size| match get_resolution_label(size.width) {
                Some(label) => format!("{} ({})", size, label),
                None => size.to_string(),
            })
            .collect();
        if !size_strs.is_empty() {
            println!("      Sizes: {}", size_strs.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Headless viewer counting the frames it was handed
struct PreviewViewer {
    id: ConsumerId,
    number: usize,
    surface: DisplaySurface,
    frames: AtomicU64,
    last_sequence: AtomicU64,
}

impl PreviewViewer {
    fn new(number: usize, width: u32, height: u32) -> Self {
        Self {
            id: ConsumerId::new(),
            number,
            surface: DisplaySurface::new(format!("viewer-{}", number), width, height),
            frames: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
        }
    }
}

impl RenderConsumer for PreviewViewer {
    fn id(&self) -> ConsumerId {
        self.id
    }

    fn display_surface(&self) -> DisplaySurface {
        self.surface.clone()
    }

    fn create_resources(&self, context: &mut dyn RenderContext) -> Result<(), RenderError> {
        debug!(viewer = self.number, context = %context.id(), "Viewer resources created");
        Ok(())
    }

    fn destroy_resources(&self, context: &mut dyn RenderContext) {
        debug!(viewer = self.number, context = %context.id(), "Viewer resources destroyed");
    }

    fn draw(&self, _context: &mut dyn RenderContext, texture: &TextureHandle) -> Result<(), RenderError> {
        if let Some(sequence) = texture.sequence() {
            self.last_sequence.store(sequence, Ordering::Relaxed);
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_error(&self, error: &RenderError) {
        warn!(viewer = self.number, error = %error, "Viewer render error");
    }
}

/// Share one camera between `viewers` render threads
///
/// Every viewer opens the camera and starts the preview itself, the way
/// independent windows would. Runs for `duration_secs` or until Ctrl-C.
pub fn run_preview(config: &Config, camera: u32, viewers: usize, duration_secs: u64) -> AppResult<()> {
    let index = CameraIndex(camera);
    let backend = get_backend_for_type(config.backend);
    let registry = CameraResourceRegistry::new(backend, Arc::new(SoftwareContextFactory::new()))
        .with_focus(config.focus)
        .with_render_settings(config.render_settings());
    registry.flag(index, config.guard.state_check, config.guard.reference_count, false);

    let cameras = registry.enumerate_cameras()?;
    let device = cameras
        .iter()
        .find(|device| device.index == index)
        .ok_or_else(|| BackendError::DeviceNotFound(format!("{} out of range ({} cameras found)", index, cameras.len())))?;
    println!("Using camera: {}", device.name);

    let chooser = NearestSizeChooser::new(config.preview_size);
    let mut attached = Vec::with_capacity(viewers);
    for number in 0..viewers {
        registry.open(index, &chooser)?;
        registry.start_preview(index)?;

        let size = registry.get_frame_size(index).unwrap_or(config.preview_size);
        let viewer = Arc::new(PreviewViewer::new(number, size.width, size.height));
        registry.attach(index, viewer.clone())?;
        attached.push(viewer);
    }
    if let Some(size) = registry.get_frame_size(index) {
        println!("Preview size: {}", size);
    }

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .map_err(|e| AppError::Other(format!("Failed to install Ctrl-C handler: {}", e)))?;

    if duration_secs == 0 {
        println!("Previewing with {} viewers, press Ctrl-C to stop", viewers);
    } else {
        println!("Previewing with {} viewers for {}s", viewers, duration_secs);
    }

    let started = Instant::now();
    let deadline = (duration_secs > 0).then(|| started + Duration::from_secs(duration_secs));
    while running.load(Ordering::SeqCst) && deadline.is_none_or(|deadline| Instant::now() < deadline) {
        std::thread::sleep(Duration::from_millis(100));
    }
    let elapsed = started.elapsed().as_secs_f64();

    for viewer in &attached {
        registry.detach(index, viewer.id);
        registry.stop_preview(index)?;
        registry.close(index)?;
    }
    registry.shutdown();

    println!();
    for viewer in &attached {
        let frames = viewer.frames.load(Ordering::Relaxed);
        println!(
            "  viewer {} [{}]: {} frames ({:.1} fps), last sequence {}",
            viewer.number,
            viewer.id,
            frames,
            frames as f64 / elapsed.max(f64::EPSILON),
            viewer.last_sequence.load(Ordering::Relaxed)
        );
    }

    Ok(())
}

/// Apply `filter` to an image file through the filter pipeline
pub fn filter_image(config: &Config, input: &Path, output: &Path, filter: FilterType) -> AppResult<()> {
    let image = image::open(input)?.to_rgba8();
    println!("Filtering {} ({}x{}) with {}", input.display(), image.width(), image.height(), filter);

    let pipeline = FilterPipeline::new(config.serializer_settings())
        .map_err(|e| AppError::Other(format!("Failed to start filter pipeline: {}", e)))?;
    let filtered = pipeline
        .apply_filter(image, filter)?
        .ok_or_else(|| FilterError::Failed(format!("{} filter produced no image", filter)))?;
    pipeline.quit();

    filtered.save(output)?;
    println!("Saved: {}", output.display());
    Ok(())
}
